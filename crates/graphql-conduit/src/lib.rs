//! GraphQL execution client for queries, mutations and subscriptions.
//!
//! This crate provides one executor abstraction over a remote GraphQL
//! endpoint. Callers hand it an operation; the executor picks the transport:
//!
//! - **Queries and mutations** go over HTTP. The response is decoded by its
//!   `content-type`: plain JSON resolves to a single result, while
//!   `multipart/mixed` (incremental delivery) and `text/event-stream`
//!   responses become lazy result streams.
//! - **Subscriptions and live queries** go over the subscription transport
//!   chosen at build time: graphql-transport-ws, the legacy graphql-ws
//!   protocol, SSE over the HTTP endpoint, or a dedicated GraphQL-SSE
//!   client.
//!
//! Retry and cancellation layer uniformly over all transports.
//!
//! # Queries and mutations
//!
//! ```ignore
//! use graphql_conduit::{ExecutionRequest, Executor};
//!
//! let executor = Executor::builder("https://api.example.com/graphql").build()?;
//!
//! let result = executor
//!     .execute(&ExecutionRequest::new(r#"
//!         query GetUser($id: ID!) {
//!             user(id: $id) { id name email }
//!         }
//!     "#).variable("id", "123"))
//!     .await?
//!     .into_single()?;
//!
//! let user: User = result.field("user")?;
//! ```
//!
//! # Subscriptions
//!
//! ```ignore
//! use graphql_conduit::{ExecutionRequest, Executor, SubscriptionProtocol};
//!
//! let executor = Executor::builder("https://api.example.com/graphql")
//!     .subscriptions_endpoint("wss://api.example.com/graphql")
//!     .subscription_protocol(SubscriptionProtocol::WebSocket)
//!     .build()?;
//!
//! let mut stream = executor
//!     .subscribe(&ExecutionRequest::new("subscription { messageReceived { id } }"))
//!     .await?;
//!
//! while let Some(result) = stream.next().await {
//!     println!("{:?}", result?.data);
//! }
//!
//! // Tears down the server-side subscription, not just local consumption.
//! stream.cancel();
//! ```
//!
//! # File uploads
//!
//! ```ignore
//! use graphql_conduit::{ExecutionRequest, Executor, FileUpload};
//!
//! let executor = Executor::builder("https://api.example.com/graphql")
//!     .multipart(true)
//!     .build()?;
//!
//! let avatar = FileUpload::from_path("avatar.png").await?.content_type("image/png");
//! let request = ExecutionRequest::new(
//!     "mutation($file: Upload!) { setAvatar(file: $file) }"
//! )
//! .upload("file", avatar);
//! ```

mod builder;
mod decode;
mod error;
mod executor;
mod request;
mod response;
mod retry;
mod stream;
mod upload;

pub use builder::{Authentication, ExecutorBuilder, SubscriptionProtocol};
pub use error::{Result, TransportError};
pub use executor::{Execution, Executor};
pub use request::{ExecutionRequest, OperationType};
pub use response::{
    ExecutionPatch, ExecutionResult, GraphQLError, GraphQLLocation, PathSegment,
};
pub use stream::ExecutionStream;
pub use upload::FileUpload;
