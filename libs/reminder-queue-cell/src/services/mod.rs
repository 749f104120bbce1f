pub mod queue;
pub mod producer;
pub mod worker;
pub mod dispatcher;
pub mod in_app;
pub mod batch;
pub mod consumer;

pub use queue::*;
pub use producer::*;
pub use worker::*;
pub use dispatcher::*;
pub use in_app::*;
pub use batch::*;
pub use consumer::*;
