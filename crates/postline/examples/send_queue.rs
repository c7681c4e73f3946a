//! Queues a few messages against a real server.
//!
//! ```text
//! SMTP_HOST=smtp.example.com SMTP_USER=me@example.com SMTP_PASS=secret \
//! MAIL_FROM=me@example.com MAIL_TO=you@example.org \
//! RUST_LOG=postline=debug cargo run --example send_queue
//! ```

use std::env;

use anyhow::{Context, Result};
use postline::{Client, ClientConfig, Draft};
use postline_smtp::{Config, Connection, Security};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postline=debug,postline_smtp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = env::var("SMTP_HOST").context("SMTP_HOST is not set")?;
    let from = env::var("MAIL_FROM").context("MAIL_FROM is not set")?;
    let to = env::var("MAIL_TO").context("MAIL_TO is not set")?;

    let mut config = Config::new(host).security(Security::StartTls);
    if let Ok(port) = env::var("SMTP_PORT") {
        config = config.port(port.parse().context("SMTP_PORT is not a port number")?);
    }
    if let (Ok(user), Ok(pass)) = (env::var("SMTP_USER"), env::var("SMTP_PASS")) {
        config = config.credentials(user, pass);
    }

    let client = Client::new(Connection::new(config), ClientConfig::default());
    let (done, mut results) = mpsc::unbounded_channel();

    for n in 1..=3 {
        let draft = Draft::new(from.as_str())
            .to(&to)
            .subject(format!("postline test {n}"))
            .text(format!("Message {n} of 3.\n"));
        let done = done.clone();
        client.submit_draft(draft, move |result, email| {
            let _ = done.send((email.message_id().to_string(), result));
        });
    }
    drop(done);

    while let Some((message_id, result)) = results.recv().await {
        match result {
            Ok(()) => info!(%message_id, "sent"),
            Err(err) => info!(%message_id, error = %err, "failed"),
        }
    }

    Ok(())
}
