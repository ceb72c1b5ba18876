pub mod finalizer;
pub mod fulfillment;
pub mod manager;
pub mod orchestrator;

pub use finalizer::OrderFinalizer;
pub use fulfillment::{Ticket, TicketIssuer};
pub use manager::OrderManager;
pub use orchestrator::{PaymentOrchestrator, SimulatedGateway};
