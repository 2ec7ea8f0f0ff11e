pub mod action;
pub mod automation;
pub mod channel;
pub mod error;
pub mod health;
pub mod payload;
pub mod request;
pub mod types;

pub use action::{ActionStatus, NewAction, PendingAction};
pub use automation::{AutomationDefinition, TriggerDefinition, TriggerType};
pub use channel::Channel;
pub use error::{PayloadError, UnknownVariant};
pub use health::{ProviderHealthRecord, SystemAlert};
pub use payload::{ChannelMessage, EmailMessage, EventPayload, SmsMessage, WhatsappMessage};
pub use request::{DispatchRequest, FunctionReply, ProbeAction};
pub use types::{ActionId, AutomationId, IdempotencyKey, TriggerId};
