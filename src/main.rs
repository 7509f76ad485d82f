use pokemon_arena::battle::ai::{Behavior, StrongestAttackAI};
use pokemon_arena::{Arena, ArenaConfig, ArenaError, ArenaResult, Caller, TurnRng};
use std::env;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEMO_USER: &str = "demo-trainer";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [player, opponent] = args.as_slice() else {
        eprintln!("Usage: pokemon-arena <player-species> <opponent-species>");
        return ExitCode::from(2);
    };

    match run(player, opponent).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(player: &str, opponent: &str) -> ArenaResult<()> {
    let arena = Arena::connect(ArenaConfig::from_env()).await?;
    let trainer = Caller::new(DEMO_USER, "Trainer");

    let view = arena.battles.init_ai_battle(&trainer, player, opponent).await?;
    for message in &view.messages {
        println!("{}", message);
    }

    let picker = StrongestAttackAI;
    let mut rng = TurnRng::new_random();
    loop {
        let battle = arena
            .battles
            .store()
            .load(view.battle_id)
            .await?
            .ok_or_else(|| ArenaError::battle_not_found(view.battle_id))?;
        if !battle.is_active() {
            break;
        }

        let side = battle
            .side_of(DEMO_USER)
            .ok_or_else(|| ArenaError::Unauthorized(DEMO_USER.to_string()))?;
        let Some(move_id) = picker.choose_attack(side, &battle, &mut rng) else {
            break;
        };

        let report = arena.battles.resolve_turn(view.battle_id, &trainer, move_id).await?;
        for message in &report.new_messages {
            println!("{}", message);
        }
        println!("  HP: {} / {}", report.player1_hp, report.player2_hp);
    }

    if let Some(stats) = arena.ranking.user_stats(DEMO_USER).await? {
        println!();
        println!(
            "{}: {} battles, {}W/{}L/{}D, win rate {:.1}%, rating {} (rank #{})",
            stats.stats.display_name,
            stats.stats.total_battles,
            stats.stats.wins,
            stats.stats.losses,
            stats.stats.draws,
            stats.win_rate,
            stats.stats.rating,
            stats.rank
        );
    }

    Ok(())
}
