pub mod clock;
pub mod error;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AllocError, LockResultExt, StorageError};
pub use store::{CounterKey, CounterStore, CounterType, DepartmentId, RequesterId};
