//! Temporary bans
//!
//! A temp-ban removes a user from a group and stores the time at which they
//! may come back. Expiry is polled, not event-driven. Each sweep claims an
//! expired record by deleting it and only then reverses the ban, so a record
//! is processed at most once even when the sweep is cancelled mid-way or the
//! reversal fails.

use crate::clock::minutes_after;
use crate::protocol::{jid, ParticipantAction, Presence, ProtocolClient};
use crate::store::{Store, TempBanRecord};
use crate::tasks::pause_between_actions;
use crate::{Clock, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records consumed
    pub processed: usize,
    /// Users added back to their group
    pub restored: usize,
    /// Users sent an invite link instead
    pub invited: usize,
    /// Reversals that failed entirely
    pub failed: usize,
}

/// Temp-ban bookkeeping and expiry sweep
pub struct TempBanService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    /// Pause range between moderation actions, in milliseconds
    pacing: (u64, u64),
}

impl TempBanService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            pacing: (0, 0),
        }
    }

    /// Pause a random duration in `[min_ms, max_ms]` before each reversal
    pub fn with_pacing(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.pacing = (min_ms, max_ms.max(min_ms));
        self
    }

    /// Persist a ban lasting `minutes`; the caller removes the participant.
    ///
    /// A duration past the representable range is rejected and nothing is
    /// stored.
    pub async fn ban(
        &self,
        group_id: &str,
        user_id: &str,
        admin_id: &str,
        minutes: u64,
    ) -> Result<TempBanRecord> {
        let now = self.clock.now();
        let mut record = TempBanRecord {
            id: String::new(),
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            unban_at: minutes_after(now, minutes)?,
            banned_by: admin_id.to_string(),
            duration_minutes: minutes,
            created_at: now,
        };
        record.id = self.store.add_temp_ban(record.clone()).await?;
        Ok(record)
    }

    /// Reverse every expired ban.
    ///
    /// Only a failure to query the store is returned as an error; per-record
    /// failures are logged and counted. A record that cannot be claimed is
    /// left for the next sweep.
    pub async fn sweep(&self, client: &dyn ProtocolClient) -> Result<SweepReport> {
        let expired = self.store.expired_temp_bans(self.clock.now()).await?;
        let mut report = SweepReport::default();

        if expired.is_empty() {
            return Ok(report);
        }
        info!("Processing {} expired bans", expired.len());

        for ban in expired {
            if let Err(e) = self.store.delete_temp_ban(&ban.id).await {
                error!("Error claiming ban record {}: {}", ban.id, e);
                continue;
            }
            report.processed += 1;
            self.pace().await;

            match restore(client, &ban).await {
                Ok(()) => {
                    info!("Auto-added {} to {}", ban.user_id, ban.group_id);
                    report.restored += 1;
                }
                Err(e) => {
                    warn!("Failed to auto-add {} to {}: {}", ban.user_id, ban.group_id, e);
                    match send_invite(client, &ban).await {
                        Ok(()) => report.invited += 1,
                        Err(e) => {
                            error!("Failed to send invite DM to {}: {}", ban.user_id, e);
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    async fn pace(&self) {
        let (min, max) = self.pacing;
        pause_between_actions(min, max).await;
    }
}

async fn restore(client: &dyn ProtocolClient, ban: &TempBanRecord) -> Result<()> {
    // Presence is cosmetic; a failure here must not block the reversal
    if let Err(e) = client.send_presence(Presence::Composing, Some(&ban.group_id)).await {
        warn!("Presence update before restoring {} failed: {}", ban.user_id, e);
    }

    client
        .update_participants(&ban.group_id, std::slice::from_ref(&ban.user_id), ParticipantAction::Add)
        .await?;

    let text = format!(
        "🕊️ *BIENVENIDO DE VUELTA*\n\n{}, tu tiempo de castigo terminó.\nPórtate bien esta vez.",
        jid::mention(&ban.user_id)
    );
    if let Err(e) = client
        .send_text(&ban.group_id, &text, std::slice::from_ref(&ban.user_id))
        .await
    {
        warn!("Welcome-back message for {} failed: {}", ban.user_id, e);
    }
    Ok(())
}

async fn send_invite(client: &dyn ProtocolClient, ban: &TempBanRecord) -> Result<()> {
    let code = client.group_invite_code(&ban.group_id).await?;
    let text = format!(
        "🔓 *TU CASTIGO HA TERMINADO*\n\nNo pude agregarte automáticamente.\n🔗 Únete aquí: https://chat.whatsapp.com/{}",
        code
    );
    client.send_text(&ban.user_id, &text, &[]).await
}
