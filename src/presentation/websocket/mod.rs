//! WebSocket Connection Hub
//!
//! Real-time fan-out to connected clients, plus the request/response
//! channel clients use to submit operations.
//!
//! ```text
//!  socket --Frame--> read task --submit--> HubLink --Operation--> hub run loop
//!                                                                   |  dispatch
//!  socket <--Frame-- write task <--outbound queue-- broadcast <--+  +-> OperationRouter
//!                                                                |
//!                         Broadcaster (handlers, HTTP intake) ---+
//! ```

pub mod handler;
pub mod hub;
pub mod index;
pub mod messages;
pub mod operation;
pub mod router;
pub mod send_message;
pub mod session;

pub use handler::{ws_handler, WsState};
pub use hub::{BroadcastReport, Broadcaster, ConnectionHub, HubConfig, HubError, HubLink};
pub use index::TopicIndex;
pub use messages::{OperationRequest, OperationResponse};
pub use operation::{Operation, OperationError, OperationKind, OperationResult, SessionId};
pub use router::{OperationHandler, OperationRouter};
pub use send_message::SendMessageHandler;
pub use session::{Frame, SessionHandle};
