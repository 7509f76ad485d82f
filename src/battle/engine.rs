use crate::battle::ai::Behavior;
use crate::battle::calculators::calculate_damage;
use crate::battle::state::{
    Battle, BattleEvent, BattleId, Combatant, EventBus, LastAction, TurnLogEntry, TurnReport,
    TurnRng,
};
use crate::errors::{ArenaError, ArenaResult};
use schema::{Attack, BattleMode, BattleStatus, Side};

/// Builds a fresh battle record. Both combatants start at full HP and
/// player 1 acts first.
pub fn start_battle(
    id: BattleId,
    mut player1: Combatant,
    mut player2: Combatant,
    mode: BattleMode,
    now: u64,
) -> Battle {
    player1.current_hp = player1.max_hp;
    player2.current_hp = player2.max_hp;

    let mut battle = Battle {
        id,
        mode,
        status: BattleStatus::Active,
        players: [player1, player2],
        current_turn: Some(Side::Player1),
        turn_number: 0,
        messages: Vec::new(),
        last_action: None,
        started_at: now,
        finished_at: None,
        ratings_applied: false,
    };

    let mut bus = EventBus::new();
    bus.push(BattleEvent::BattleStarted);
    battle.push_events(&bus);
    battle
}

/// Resolves one request from the acting side.
///
/// The battle is mutated in place; callers operate on a clone and only
/// persist it when this returns `Ok`. Validation failures leave the battle
/// untouched. An AI side that cannot pick one of its own attacks fails the
/// turn with `CorruptedBattle` after the human's half-move was applied to
/// the clone.
pub fn resolve_turn(
    battle: &mut Battle,
    acting: Side,
    move_id: u8,
    rng: &mut TurnRng,
    ai: &dyn Behavior,
    now: u64,
) -> ArenaResult<TurnReport> {
    let attack = validate_action(battle, acting, move_id)?;

    let mut bus = EventBus::new();
    let actions = match battle.mode {
        BattleMode::Ai => resolve_ai_turn(battle, acting, &attack, rng, ai, &mut bus, now)?,
        BattleMode::Pvp => resolve_pvp_turn(battle, acting, &attack, rng, &mut bus, now),
    };

    let new_messages = battle.push_events(&bus);
    Ok(TurnReport::new(battle, new_messages, actions))
}

/// Ends the battle in favour of the other side, whatever the HP totals are.
pub fn forfeit(battle: &mut Battle, side: Side, now: u64) -> ArenaResult<TurnReport> {
    if !battle.is_active() {
        return Err(ArenaError::InvalidState(battle.status));
    }

    let mut bus = EventBus::new();
    bus.push(BattleEvent::Forfeited { side });
    battle.last_action = Some(LastAction::Forfeit { side });
    finish_battle(battle, side.opponent().won_status(), &mut bus, now);

    let new_messages = battle.push_events(&bus);
    Ok(TurnReport::new(battle, new_messages, Vec::new()))
}

fn validate_action(battle: &Battle, acting: Side, move_id: u8) -> ArenaResult<Attack> {
    if !battle.is_active() {
        return Err(ArenaError::InvalidState(battle.status));
    }

    // In AI mode the human is always player 1.
    if battle.mode == BattleMode::Ai && acting != Side::Player1 {
        return Err(ArenaError::NotYourTurn);
    }
    if battle.current_turn != Some(acting) {
        return Err(ArenaError::NotYourTurn);
    }

    battle
        .combatant(acting)
        .find_attack(move_id)
        .cloned()
        .ok_or(ArenaError::InvalidMove(move_id))
}

fn resolve_ai_turn(
    battle: &mut Battle,
    acting: Side,
    attack: &Attack,
    rng: &mut TurnRng,
    ai: &dyn Behavior,
    bus: &mut EventBus,
    now: u64,
) -> ArenaResult<Vec<TurnLogEntry>> {
    let mut actions = vec![apply_attack(battle, acting, attack, rng, bus, now)];

    let ai_side = acting.opponent();
    if battle.combatant(ai_side).is_fainted() {
        finish_battle(battle, acting.won_status(), bus, now);
        return Ok(actions);
    }

    let counter = ai
        .choose_attack(ai_side, battle, rng)
        .and_then(|attack_id| battle.combatant(ai_side).find_attack(attack_id).cloned())
        .ok_or_else(|| {
            ArenaError::CorruptedBattle(format!(
                "{} has no usable attack",
                battle.combatant(ai_side).species_name
            ))
        })?;

    actions.push(apply_attack(battle, ai_side, &counter, rng, bus, now));
    if battle.combatant(acting).is_fainted() {
        finish_battle(battle, ai_side.won_status(), bus, now);
        return Ok(actions);
    }

    battle.current_turn = Some(acting);
    Ok(actions)
}

fn resolve_pvp_turn(
    battle: &mut Battle,
    acting: Side,
    attack: &Attack,
    rng: &mut TurnRng,
    bus: &mut EventBus,
    now: u64,
) -> Vec<TurnLogEntry> {
    let entry = apply_attack(battle, acting, attack, rng, bus, now);

    if battle.combatant(acting.opponent()).is_fainted() {
        finish_battle(battle, acting.won_status(), bus, now);
    } else {
        battle.current_turn = Some(acting.opponent());
    }

    vec![entry]
}

/// Applies a single half-move: damage, HP floor, turn counter and events.
pub fn apply_attack(
    battle: &mut Battle,
    attacker_side: Side,
    attack: &Attack,
    rng: &mut TurnRng,
    bus: &mut EventBus,
    now: u64,
) -> TurnLogEntry {
    let defender_side = attacker_side.opponent();
    let attack_stat = battle.combatant(attacker_side).stats.attack;

    let defender = battle.combatant_mut(defender_side);
    let roll = calculate_damage(
        attack_stat,
        defender.stats.defense,
        attack.power,
        attack.move_type,
        &defender.types,
        rng,
    );
    let hp_before = defender.current_hp;
    let hp_after = defender.take_damage(roll.damage);

    battle.turn_number += 1;

    bus.push(BattleEvent::MoveUsed {
        side: attacker_side,
        attack_name: attack.name.clone(),
    });
    bus.push(BattleEvent::AttackTypeEffectiveness {
        multiplier: roll.effectiveness,
    });
    bus.push(BattleEvent::DamageDealt {
        target: defender_side,
        damage: roll.damage,
        remaining_hp: hp_after,
    });
    if hp_after == 0 {
        bus.push(BattleEvent::PokemonFainted {
            side: defender_side,
        });
    }

    let entry = TurnLogEntry {
        turn_number: battle.turn_number,
        side: attacker_side,
        attack_id: attack.id,
        attack_name: attack.name.clone(),
        damage: roll.damage,
        effectiveness: roll.effectiveness,
        target_hp_before: hp_before,
        target_hp_after: hp_after,
        recorded_at: now,
    };
    battle.last_action = Some(LastAction::Attack(entry.clone()));
    entry
}

fn finish_battle(battle: &mut Battle, status: BattleStatus, bus: &mut EventBus, now: u64) {
    battle.status = status;
    battle.current_turn = None;
    battle.finished_at = Some(now);
    bus.push(BattleEvent::BattleEnded {
        winner: status.winner(),
    });
}
