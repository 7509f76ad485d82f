#[cfg(test)]
mod tests {
    use crate::battle::engine::forfeit;
    use crate::battle::state::LastAction;
    use crate::battle::tests::common::{assert_ok, create_test_battle, TEST_START};
    use crate::errors::ArenaError;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use schema::{BattleMode, BattleStatus, Side};

    #[rstest]
    #[case(Side::Player1, BattleStatus::Player2Won)]
    #[case(Side::Player2, BattleStatus::Player1Won)]
    fn test_forfeit_awards_opponent(#[case] side: Side, #[case] expected: BattleStatus) {
        let mut battle = create_test_battle(BattleMode::Pvp);
        // Forfeiting wins the battle for the other side regardless of HP.
        battle.combatant_mut(side.opponent()).current_hp = 1;

        let report = assert_ok(forfeit(&mut battle, side, TEST_START + 12));

        assert_eq!(report.status, expected);
        assert_eq!(report.winner, Some(side.opponent()));
        assert_eq!(report.current_turn, None);
        assert!(report.actions.is_empty());
        assert_eq!(report.turn_number, 0);
        assert_eq!(battle.finished_at, Some(TEST_START + 12));
        assert_eq!(battle.last_action, Some(LastAction::Forfeit { side }));
    }

    #[test]
    fn test_forfeit_messages() {
        let mut battle = create_test_battle(BattleMode::Pvp);
        let report = assert_ok(forfeit(&mut battle, Side::Player2, TEST_START));
        assert_eq!(
            report.new_messages,
            vec!["Gary forfeited the battle.", "Ash wins the battle!"]
        );
    }

    #[test]
    fn test_ai_battle_forfeit() {
        let mut battle = create_test_battle(BattleMode::Ai);
        let report = assert_ok(forfeit(&mut battle, Side::Player1, TEST_START));
        assert_eq!(report.status, BattleStatus::Player2Won);
    }

    #[test]
    fn test_cannot_forfeit_twice() {
        let mut battle = create_test_battle(BattleMode::Pvp);
        assert_ok(forfeit(&mut battle, Side::Player1, TEST_START));

        let result = forfeit(&mut battle, Side::Player2, TEST_START);
        assert!(matches!(
            result,
            Err(ArenaError::InvalidState(BattleStatus::Player2Won))
        ));
        assert_eq!(battle.status, BattleStatus::Player2Won);
    }
}
