pub mod diagnostics;
pub mod notifications;
pub mod stream;
