// HTTP surface: routing, password gates and response encoding.

pub mod form;
pub mod handler;
pub mod response;
pub mod serve;

pub use handler::{router, AppState, FileServer, SharedState};
