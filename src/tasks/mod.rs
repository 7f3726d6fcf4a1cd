//! Task entry points invoked by the external task runtime.
//!
//! Both are fire-and-forget: no result is consumed by the runtime, all
//! observable state lives in the progress store. The `Result` they return
//! carries store failures only, for the consumer loop's logging.

pub mod batch;
pub mod completion;
pub mod waiter;

pub use batch::allocate_batch;
pub use waiter::wait_for_code;
