//! Channel and bridge queries

use std::sync::Arc;

use tracing::{debug, info};

use ispbx_ami_core::{Action, ActionSubmitter, AmiError, AmiResult, Record};

use crate::parsers::{parse_bridges, parse_channels, project_active_calls, ActiveCall, Bridge, Channel};

pub struct CallManager {
    submitter: Arc<dyn ActionSubmitter>,
}

impl CallManager {
    pub fn new(submitter: Arc<dyn ActionSubmitter>) -> Self {
        Self { submitter }
    }

    async fn channel_records(&self) -> AmiResult<Vec<Record>> {
        let reply = self
            .submitter
            .submit(Action::new("CoreShowChannels"))
            .await?
            .into_result("CoreShowChannels")?;
        Ok(reply.into_records())
    }

    /// `BridgeList` followed by one `BridgeInfo` per bridge, concatenated
    async fn bridge_records(&self) -> AmiResult<Vec<Record>> {
        let list = self
            .submitter
            .submit(Action::new("BridgeList"))
            .await?
            .into_result("BridgeList")?;
        let ids: Vec<String> = list
            .events("BridgeListItem")
            .map(|r| r.get_or_empty("BridgeUniqueid").to_string())
            .filter(|id| !id.is_empty())
            .collect();

        let mut records = list.into_records();
        for id in ids {
            let info = self
                .submitter
                .submit(Action::new("BridgeInfo").param("BridgeUniqueid", id.as_str()))
                .await?;
            if info.is_error() {
                // The bridge went away between the two queries
                debug!(bridge = %id, message = info.message(), "Bridge info unavailable");
                continue;
            }
            records.extend(info.into_records());
        }
        Ok(records)
    }

    pub async fn list_channels(&self) -> AmiResult<Vec<Channel>> {
        Ok(parse_channels(&self.channel_records().await?).into_values().collect())
    }

    pub async fn list_bridges(&self) -> AmiResult<Vec<Bridge>> {
        Ok(parse_bridges(&self.bridge_records().await?).into_values().collect())
    }

    /// Channels that are not in any bridge
    pub async fn list_active_calls(&self) -> AmiResult<Vec<ActiveCall>> {
        let channels = parse_channels(&self.channel_records().await?);
        let bridges = parse_bridges(&self.bridge_records().await?);
        Ok(project_active_calls(&channels, &bridges))
    }

    pub async fn hangup(&self, channel: &str) -> AmiResult<()> {
        let reply = self
            .submitter
            .submit(Action::new("Hangup").param("Channel", channel))
            .await?;
        if reply.is_error() {
            if reply.message().to_ascii_lowercase().contains("no such channel") {
                return Err(AmiError::not_found(format!("channel {}", channel)));
            }
            return Err(AmiError::protocol("Hangup", reply.message()));
        }
        info!(channel, "Channel hung up");
        Ok(())
    }
}
