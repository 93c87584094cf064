use crate::engine::WatchdogHandle;

/// Shared by every actix worker; the handle itself is cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub watchdog: WatchdogHandle,
}

pub fn new_state(watchdog: WatchdogHandle) -> AppState {
    AppState { watchdog }
}
