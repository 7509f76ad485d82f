use rand::{Rng, SeedableRng};
use schema::{Attack, BattleMode, BattleStatus, PokemonType, Side};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Owner id used for the computer-controlled side of an AI battle.
pub const AI_USER_ID: &str = "ai";

/// Unique identifier for a battle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BattleId(pub Uuid);

impl BattleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BattleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BattleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BattleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(BattleId)
    }
}

/// Seconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Derived battle stats. HP lives on the combatant since it changes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatBlock {
    pub attack: u16,
    pub defense: u16,
    pub speed: u16,
}

/// One side's creature in a battle together with its owner.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Combatant {
    pub user_id: String,
    pub display_name: String,
    pub species_id: u32,
    pub species_name: String,
    pub types: Vec<PokemonType>,
    pub current_hp: u16,
    pub max_hp: u16,
    pub stats: StatBlock,
    pub attacks: Vec<Attack>,
}

impl Combatant {
    pub fn is_ai(&self) -> bool {
        self.user_id == AI_USER_ID
    }

    pub fn is_fainted(&self) -> bool {
        self.current_hp == 0
    }

    pub fn find_attack(&self, attack_id: u8) -> Option<&Attack> {
        self.attacks.iter().find(|attack| attack.id == attack_id)
    }

    /// Subtracts damage, flooring HP at zero. Returns the remaining HP.
    pub fn take_damage(&mut self, damage: u16) -> u16 {
        self.current_hp = self.current_hp.saturating_sub(damage);
        self.current_hp
    }

    pub fn display_species(&self) -> String {
        let mut chars = self.species_name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

/// Audit entry for one applied half-move.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TurnLogEntry {
    pub turn_number: u32,
    pub side: Side,
    pub attack_id: u8,
    pub attack_name: String,
    pub damage: u16,
    pub effectiveness: f64,
    pub target_hp_before: u16,
    pub target_hp_after: u16,
    pub recorded_at: u64,
}

/// The most recent action, kept on the record so a client polling the battle
/// can animate what the other side just did.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LastAction {
    Attack(TurnLogEntry),
    Forfeit { side: Side },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum BattleEvent {
    BattleStarted,
    MoveUsed { side: Side, attack_name: String },
    AttackTypeEffectiveness { multiplier: f64 },
    DamageDealt { target: Side, damage: u16, remaining_hp: u16 },
    PokemonFainted { side: Side },
    Forfeited { side: Side },
    BattleEnded { winner: Option<Side> },
}

impl BattleEvent {
    /// Formats the event into log lines using battle context.
    /// Silent events (neutral effectiveness) produce no lines.
    pub fn format(&self, battle: &Battle) -> Vec<String> {
        match self {
            BattleEvent::BattleStarted => vec![
                format!(
                    "{} vs {}!",
                    battle.players[0].display_species(),
                    battle.players[1].display_species()
                ),
                "Battle begins!".to_string(),
            ],
            BattleEvent::MoveUsed { side, attack_name } => vec![format!(
                "{} used {}!",
                battle.combatant(*side).display_species(),
                attack_name
            )],
            BattleEvent::AttackTypeEffectiveness { multiplier } => {
                crate::battle::calculators::effectiveness_message(*multiplier)
                    .map(|message| vec![message.to_string()])
                    .unwrap_or_default()
            }
            BattleEvent::DamageDealt { target, damage, .. } => vec![format!(
                "{} took {} damage.",
                battle.combatant(*target).display_species(),
                damage
            )],
            BattleEvent::PokemonFainted { side } => {
                vec![format!("{} fainted!", battle.combatant(*side).display_species())]
            }
            BattleEvent::Forfeited { side } => vec![format!(
                "{} forfeited the battle.",
                battle.combatant(*side).display_name
            )],
            BattleEvent::BattleEnded { winner: Some(side) } => {
                vec![format!("{} wins the battle!", battle.combatant(*side).display_name)]
            }
            BattleEvent::BattleEnded { winner: None } => {
                vec!["The battle ended in a draw.".to_string()]
            }
        }
    }
}

/// Collects the events of one resolution step in order.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    events: Vec<BattleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: BattleEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[BattleEvent] {
        &self.events
    }
}

enum RngSource {
    Scripted { rolls: Vec<f64>, index: usize },
    Random(rand::rngs::StdRng),
}

/// Source of the random draws a resolution step needs: damage variation and
/// the AI's move pick. Tests script the draws for deterministic outcomes.
pub struct TurnRng {
    source: RngSource,
}

impl TurnRng {
    /// Replays the given rolls (each in `[0, 1)`), cycling when exhausted.
    pub fn new_for_test(rolls: Vec<f64>) -> Self {
        Self {
            source: RngSource::Scripted { rolls, index: 0 },
        }
    }

    pub fn new_random() -> Self {
        let rng = rand::rngs::StdRng::from_rng(&mut rand::rng());
        Self {
            source: RngSource::Random(rng),
        }
    }

    /// Next uniform roll in `[0, 1)`.
    pub fn next_roll(&mut self, reason: &str) -> f64 {
        let roll = match &mut self.source {
            RngSource::Scripted { rolls, index } => {
                if rolls.is_empty() {
                    0.5
                } else {
                    let roll = rolls[*index % rolls.len()];
                    *index += 1;
                    roll.clamp(0.0, 0.999_999)
                }
            }
            RngSource::Random(rng) => rng.random::<f64>(),
        };

        #[cfg(test)]
        println!("[RNG] Consumed {:.3} for: {}", roll, reason);
        #[cfg(not(test))]
        let _ = reason;

        roll
    }

    /// Uniform index into a list of `len` elements. `len` must be non-zero.
    pub fn choose_index(&mut self, len: usize, reason: &str) -> usize {
        let roll = self.next_roll(reason);
        ((roll * len as f64) as usize).min(len.saturating_sub(1))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Battle {
    pub id: BattleId,
    pub mode: BattleMode,
    pub status: BattleStatus,
    pub players: [Combatant; 2],
    /// Side expected to act next; `None` once the battle is over.
    pub current_turn: Option<Side>,
    /// Number of half-moves applied so far.
    pub turn_number: u32,
    pub messages: Vec<String>,
    pub last_action: Option<LastAction>,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    /// Set once the stats/ranking update for this battle has been claimed.
    #[serde(default)]
    pub ratings_applied: bool,
}

impl Battle {
    pub fn combatant(&self, side: Side) -> &Combatant {
        &self.players[side.index()]
    }

    pub fn combatant_mut(&mut self, side: Side) -> &mut Combatant {
        &mut self.players[side.index()]
    }

    /// The seat owned by `user_id`, if the user takes part in this battle.
    pub fn side_of(&self, user_id: &str) -> Option<Side> {
        if self.players[0].user_id == user_id {
            Some(Side::Player1)
        } else if self.players[1].user_id == user_id {
            Some(Side::Player2)
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BattleStatus::Active
    }

    pub fn winner_user_id(&self) -> Option<&str> {
        self.status
            .winner()
            .map(|side| self.combatant(side).user_id.as_str())
    }

    pub fn push_events(&mut self, events: &EventBus) -> Vec<String> {
        let mut appended = Vec::new();
        for event in events.events() {
            appended.extend(event.format(self));
        }
        self.messages.extend(appended.iter().cloned());
        appended
    }

    /// Projection safe to send to a client: no attack/defense/speed numbers
    /// and only the viewer's own attack list.
    pub fn view_for(&self, viewer: Option<Side>) -> BattleView {
        let combatant_view = |side: Side| {
            let combatant = self.combatant(side);
            CombatantView {
                user_id: combatant.user_id.clone(),
                display_name: combatant.display_name.clone(),
                species_id: combatant.species_id,
                species_name: combatant.species_name.clone(),
                types: combatant.types.clone(),
                current_hp: combatant.current_hp,
                max_hp: combatant.max_hp,
                attacks: (viewer == Some(side)).then(|| combatant.attacks.clone()),
            }
        };

        BattleView {
            battle_id: self.id,
            mode: self.mode,
            status: self.status,
            viewer,
            current_turn: self.current_turn,
            turn_number: self.turn_number,
            players: [combatant_view(Side::Player1), combatant_view(Side::Player2)],
            messages: self.messages.clone(),
            last_action: self.last_action.clone(),
        }
    }

    pub fn summary(&self) -> BattleSummary {
        let participant = |side: Side| {
            let combatant = self.combatant(side);
            ParticipantSummary {
                user_id: combatant.user_id.clone(),
                display_name: combatant.display_name.clone(),
                species_id: combatant.species_id,
                species_name: combatant.species_name.clone(),
            }
        };

        BattleSummary {
            battle_id: self.id,
            mode: self.mode,
            status: self.status,
            player1: participant(Side::Player1),
            player2: participant(Side::Player2),
            winner_user_id: self.winner_user_id().map(str::to_string),
            total_turns: self.turn_number,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_seconds: self
                .finished_at
                .map(|finished| finished.saturating_sub(self.started_at)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CombatantView {
    pub user_id: String,
    pub display_name: String,
    pub species_id: u32,
    pub species_name: String,
    pub types: Vec<PokemonType>,
    pub current_hp: u16,
    pub max_hp: u16,
    pub attacks: Option<Vec<Attack>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BattleView {
    pub battle_id: BattleId,
    pub mode: BattleMode,
    pub status: BattleStatus,
    pub viewer: Option<Side>,
    pub current_turn: Option<Side>,
    pub turn_number: u32,
    pub players: [CombatantView; 2],
    pub messages: Vec<String>,
    pub last_action: Option<LastAction>,
}

/// Everything a client needs to render the outcome of one request.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TurnReport {
    pub battle_id: BattleId,
    pub status: BattleStatus,
    pub turn_number: u32,
    pub current_turn: Option<Side>,
    pub player1_hp: u16,
    pub player2_hp: u16,
    pub new_messages: Vec<String>,
    pub actions: Vec<TurnLogEntry>,
    pub winner: Option<Side>,
}

impl TurnReport {
    pub fn new(battle: &Battle, new_messages: Vec<String>, actions: Vec<TurnLogEntry>) -> Self {
        Self {
            battle_id: battle.id,
            status: battle.status,
            turn_number: battle.turn_number,
            current_turn: battle.current_turn,
            player1_hp: battle.players[0].current_hp,
            player2_hp: battle.players[1].current_hp,
            new_messages,
            actions,
            winner: battle.status.winner(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParticipantSummary {
    pub user_id: String,
    pub display_name: String,
    pub species_id: u32,
    pub species_name: String,
}

/// Row of the battle history listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BattleSummary {
    pub battle_id: BattleId,
    pub mode: BattleMode,
    pub status: BattleStatus,
    pub player1: ParticipantSummary,
    pub player2: ParticipantSummary,
    pub winner_user_id: Option<String>,
    pub total_turns: u32,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub duration_seconds: Option<u64>,
}
