use crate::monitor::Monitor;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
}

impl AppState {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self { monitor }
    }
}
