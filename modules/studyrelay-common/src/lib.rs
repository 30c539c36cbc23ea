pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{
    BrokerConfig, DateShiftConfig, DestinationConfig, FilterRule, GatewayConfig, RouteConfig,
    RouteDestination, RoutingRule, TagModification, ValidationRule,
};
pub use error::GatewayError;
pub use events::StudyReady;
pub use types::{
    BrokerScheme, DeliveryAttempt, DestinationDelivery, DestinationState, FilterAction, IdType,
    OnFailure, RuleOperator, TagAction, TransferState, ValidationKind,
};
