//! Handle: mint the persistent handle for the volume
//!
//! Emits a `REPLACE`d row the handle service consumes: the handle under
//! the configured prefix, the public repository URL it resolves to, and
//! the administrative identities. Reingest refreshes the same row.

use crate::db;
use crate::error::Result;
use crate::stage::{status, Stage, StageInfo};
use crate::volume::Volume;
use async_trait::async_trait;
use tracing::info;

pub struct Handle;

#[async_trait]
impl Stage for Handle {
    fn identifier(&self) -> &'static str {
        "handle"
    }

    fn description(&self) -> &'static str {
        "Mint the persistent handle for the volume"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo {
            success_state: status::HANDLED,
            failure_state: status::PUNTED,
        }
    }

    async fn run(&self, volume: &mut Volume) -> Result<()> {
        let config = volume.engine().config();
        let handle = format!("{}/{}", config.handle.prefix, volume.identifier());
        let url = format!("{}{}", config.repo_url_base, volume.identifier());

        db::replace_handle(
            volume.engine().pool(),
            &handle,
            &url,
            &config.handle.root_admin,
            &config.handle.local_admin,
        )
        .await?;

        info!(
            namespace = %volume.namespace(),
            objid = %volume.objid(),
            handle = %handle,
            "handle minted"
        );
        Ok(())
    }
}
