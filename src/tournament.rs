//! Tables and commands used by the tournament sync.
//!
//! A fetched tournament is upserted by id. Each top-8 standing becomes one
//! [`RecordPlacement`] command that resolves the player by start.gg id (creating
//! it when unseen) and then writes the placement row, both in the same page
//! transaction.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::EntityType;
use crate::operation::CustomOperation;
use crate::queue::OperationQueue;
use crate::result::{DbResult, TinyBatchError};
use crate::store::{Transaction, TransactionalStore};
use crate::value::{Payload, Value};

/// Entity descriptors for the tournament tables.
#[derive(Debug, Clone)]
pub struct TournamentSchema {
    pub tournaments: EntityType,
    pub players: EntityType,
    pub placements: EntityType,
}

impl TournamentSchema {
    pub fn new() -> Self {
        Self {
            tournaments: EntityType::new("tournaments", "id")
                .field("name")
                .field("num_attendees")
                .field("start_at")
                .field("end_at")
                .field("venue_name")
                .field("city")
                .field("country_code")
                .field("primary_contact")
                .field("slug")
                .field("url")
                .field("tournament_state")
                .field("sync_timestamp"),
            players: EntityType::new("players", "id")
                .unique("startgg_id")
                .field("gamer_tag")
                .field("name"),
            placements: EntityType::new("placements", "id")
                .unique("placement_key")
                .field("tournament_id")
                .field("player_id")
                .field("placement")
                .field("event_name")
                .field("event_id")
                .field("prize_amount"),
        }
    }
}

impl Default for TournamentSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// A tournament as handed over by the fetcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tournament {
    pub id: String,
    pub name: String,
    pub num_attendees: i64,
    pub start_at: Option<i64>,
    pub end_at: Option<i64>,
    pub venue_name: Option<String>,
    pub city: Option<String>,
    pub country_code: Option<String>,
    pub primary_contact: Option<String>,
    pub slug: Option<String>,
    pub url: Option<String>,
    pub state: i64,
}

impl Tournament {
    pub fn to_payload(&self, synced_at: i64) -> Payload {
        Payload::new()
            .with("id", self.id.as_str())
            .with("name", self.name.as_str())
            .with("num_attendees", self.num_attendees)
            .with("start_at", self.start_at)
            .with("end_at", self.end_at)
            .with("venue_name", self.venue_name.clone())
            .with("city", self.city.clone())
            .with("country_code", self.country_code.clone())
            .with("primary_contact", self.primary_contact.clone())
            .with("slug", self.slug.clone())
            .with("url", self.url.clone())
            .with("tournament_state", self.state)
            .with("sync_timestamp", synced_at)
    }
}

/// One entrant's final placement in an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Standing {
    pub tournament_id: String,
    pub startgg_id: String,
    pub gamer_tag: String,
    pub name: Option<String>,
    pub placement: i64,
    pub event_name: String,
    pub event_id: String,
}

impl Standing {
    fn to_payload(&self) -> Payload {
        Payload::new()
            .with("tournament_id", self.tournament_id.as_str())
            .with("startgg_id", self.startgg_id.as_str())
            .with("gamer_tag", self.gamer_tag.as_str())
            .with("name", self.name.clone())
            .with("placement", self.placement)
            .with("event_name", self.event_name.as_str())
            .with("event_id", self.event_id.as_str())
    }
}

/// Get-or-create a player, then insert or refresh its placement row.
#[derive(Debug, Clone)]
pub struct RecordPlacement {
    players: EntityType,
    placements: EntityType,
}

impl RecordPlacement {
    pub fn new(schema: &TournamentSchema) -> Self {
        Self {
            players: schema.players.clone(),
            placements: schema.placements.clone(),
        }
    }

    fn resolve_player(&self, tx: &mut dyn Transaction, payload: &Payload) -> DbResult<Value> {
        let startgg_id = required(payload, "startgg_id")?;

        match tx.find_unique(&self.players, "startgg_id", startgg_id)? {
            Some(mut player) => {
                let mut changed = false;
                for field in ["gamer_tag", "name"] {
                    if let Some(value) = payload.get(field).filter(|v| !v.is_null()) {
                        if player.get(field) != Some(value) {
                            player.set(field, value.clone());
                            changed = true;
                        }
                    }
                }
                if changed {
                    tx.save(&player)?;
                }
                Ok(player.key)
            }
            None => {
                let player = Payload::new()
                    .with("startgg_id", startgg_id.clone())
                    .with("gamer_tag", required(payload, "gamer_tag")?.clone())
                    .with("name", payload.get("name").cloned().unwrap_or(Value::Null));
                let key = tx.add(&self.players, &player)?;
                debug!(player = %key, startgg_id = %startgg_id, "created player");
                Ok(key)
            }
        }
    }
}

impl CustomOperation for RecordPlacement {
    fn execute(&self, tx: &mut dyn Transaction, payload: &Payload) -> DbResult<()> {
        let player_id = self.resolve_player(tx, payload)?;

        let tournament_id = required(payload, "tournament_id")?;
        let event_id = required(payload, "event_id")?;
        let placement = required(payload, "placement")?;
        let event_name = payload.get("event_name").cloned().unwrap_or(Value::Null);

        let placement_key = Value::Text(format!(
            "{}:{}:{}",
            plain(tournament_id),
            plain(&player_id),
            plain(event_id)
        ));

        match tx.find_unique(&self.placements, "placement_key", &placement_key)? {
            Some(mut existing) => {
                existing.set("placement", placement.clone());
                existing.set("event_name", event_name);
                tx.save(&existing)
            }
            None => tx
                .add(
                    &self.placements,
                    &Payload::new()
                        .with("placement_key", placement_key)
                        .with("tournament_id", tournament_id.clone())
                        .with("player_id", player_id)
                        .with("placement", placement.clone())
                        .with("event_name", event_name)
                        .with("event_id", event_id.clone())
                        .with("prize_amount", 0),
                )
                .map(|_| ()),
        }
    }

    fn name(&self) -> &str {
        "record_placement"
    }
}

fn required<'a>(payload: &'a Payload, field: &str) -> DbResult<&'a Value> {
    payload
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| TinyBatchError::custom(format!("record_placement requires {field}")))
}

/// Text values without quotes, everything else as displayed.
fn plain(value: &Value) -> String {
    value
        .as_text()
        .map(str::to_owned)
        .unwrap_or_else(|| value.to_string())
}

/// Queue a tournament, replacing any stored copy with the fetched data.
pub fn queue_tournament<S: TransactionalStore>(
    queue: &mut OperationQueue<S>,
    schema: &TournamentSchema,
    tournament: &Tournament,
    synced_at: i64,
) {
    queue.upsert(&schema.tournaments, tournament.to_payload(synced_at));
}

/// Queue a standing. Standings without a gamer tag or start.gg id are skipped.
///
/// Returns whether the standing was queued.
pub fn queue_standing<S: TransactionalStore>(
    queue: &mut OperationQueue<S>,
    schema: &TournamentSchema,
    standing: &Standing,
) -> bool {
    if standing.gamer_tag.is_empty() || standing.startgg_id.is_empty() {
        debug!(
            tournament = %standing.tournament_id,
            event = %standing.event_id,
            "skipping standing without player identity"
        );
        return false;
    }

    queue.custom(RecordPlacement::new(schema), standing.to_payload());
    true
}
