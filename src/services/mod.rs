pub mod consumer;
pub mod filter;
pub mod matomo;
pub mod pipeline;
pub mod rabbitmq;

pub use consumer::VisitConsumer;
pub use matomo::MatomoClient;
pub use pipeline::FetchPipeline;
pub use rabbitmq::RabbitMqManager;
