pub mod encode;
pub mod logging;
pub mod url;
