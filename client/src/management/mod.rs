//! Management-plane calls: request model, HTTP transport, the 401 retry
//! protocol and asynchronous operation polling.

pub mod executor;
pub mod poller;
pub mod request;
pub mod transport;

pub use executor::{ErrorReporter, MAX_ATTEMPTS, ManagementCallExecutor};
pub use poller::{AsyncOperationPoller, PollerConfig, parse_operation_status};
pub use request::{ContentKind, ManagementRequest};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ManagementTransport};
