//! Runnable relay with an in-memory directory.
//!
//! Seeds one shuttle with a driver and a parent, logs both in, and
//! prints their access tokens so two WebSocket clients can be pointed at
//! `/ws/demo-shuttle`:
//!
//! ```text
//! JWT_SECRET=$(head -c 32 /dev/urandom | base64) \
//! ENCRYPTION_KEY=0123456789abcdef \
//! RUST_LOG=debug cargo run -p shuttle-relay
//! ```

use std::sync::Arc;

use shuttle::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEMO_SHUTTLE: &str = "demo-shuttle";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(?config, "loaded configuration");

    let directory = Arc::new(InMemoryDirectory::new());
    let server = ShuttleServerBuilder::new()
        .config(config)
        .build(Arc::clone(&directory), MemoryRefreshStore::new())
        .await?;

    let shuttle = GroupKey::new(DEMO_SHUTTLE)?;
    for (n, name, role) in [(1, "driver", RoleCode::Driver), (2, "parent", RoleCode::Parent)] {
        let identity = Identity {
            user_id: UserId(n),
            user_uuid: Uuid::new_v4(),
            display_name: name.to_string(),
            role,
        };
        directory.insert_user(identity.clone());
        directory.add_member(&shuttle, identity.user_uuid);

        let pair = server.sessions().login(&identity).await?;
        tracing::info!(
            user = name,
            user_uuid = %identity.user_uuid,
            access = %pair.access.token,
            refresh = %pair.refresh.token,
            "seeded demo user"
        );
    }

    tracing::info!(addr = %server.local_addr()?, group = DEMO_SHUTTLE, "relay listening");
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
