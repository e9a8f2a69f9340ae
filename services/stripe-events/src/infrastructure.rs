// Infrastructure layer modules
pub mod config;
pub mod customer_repository;
pub mod event_publisher;
pub mod logging;
pub mod secret_provider;

// Re-exports
pub use config::{ConfigError, CustomerTableConfig, EventDispatch, WebhookConfig};
pub use customer_repository::{CustomerRepository, DynamoCustomerRepository, RepositoryError};
pub use event_publisher::{EventBridgePublisher, EventPublisher, LambdaInvokePublisher, PublishError};
pub use logging::init_logging;
pub use secret_provider::{
    EnvironmentSecretProvider, SecretError, SecretProvider, SecretsManagerSecretProvider,
    SsmParameterSecretProvider, StaticSecretProvider,
};
