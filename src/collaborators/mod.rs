//! External collaborator capabilities injected into the controller
//!
//! Every side effect the core performs goes through one of these traits:
//! - `HttpClient`: outbound HTTP (checks, notifications, providers)
//! - `CommandRunner`: archive creation/extraction
//! - `DeploymentProvider` / `DnsProvider`: infrastructure provisioning
//! - `ConfigStore`: hosting configuration republish
//! - `Notifier`: alert channels

mod command;
mod config_store;
mod http;
mod notify;
mod provider;

pub use command::{CommandError, CommandOutput, CommandRunner, SystemCommandRunner};
pub use config_store::{ConfigStore, ConfigStoreError, EnvFileStore, MemoryConfigStore};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient, TransportError};
pub use notify::{build_notifier, format_chat_message, Notifier, NotifyError, TelegramNotifier, WebhookNotifier};
pub use provider::{
    DeploymentProvider, DnsProvider, HttpDeploymentProvider, HttpDnsProvider, ProviderError,
};
