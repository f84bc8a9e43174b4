use landrush_shared::QuestKind;
use uuid::Uuid;

use crate::store::PgTransaction;

#[derive(Debug, Clone)]
pub struct QuestProgress {
    pub quest_id: Uuid,
    pub current: f64,
    pub target: f64,
}

#[derive(Debug, Clone)]
pub struct QuestWin {
    pub quest_id: Uuid,
    pub winner_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct QuestOutcome {
    pub progress: Vec<QuestProgress>,
    pub completed: Vec<QuestWin>,
}

/// Advance every active quest of `kind` for one player, inside the caller's
/// transaction. Each quest advances under a savepoint: the first player to
/// reach the target takes the quest row lock and wins; a loser's progress
/// write rolls back to the savepoint so the claim itself still commits.
pub async fn record(
    tx: &mut PgTransaction,
    player_id: &str,
    kind: QuestKind,
    delta: f64,
) -> Result<QuestOutcome, sqlx::Error> {
    let mut outcome = QuestOutcome::default();
    if delta <= 0.0 {
        return Ok(outcome);
    }

    let quests: Vec<(Uuid, f64)> = sqlx::query_as(
        "SELECT id, target FROM quests \
         WHERE kind = $1 AND active AND winner_id IS NULL AND expires_at > NOW() \
         ORDER BY id",
    )
    .bind(kind.as_str())
    .fetch_all(&mut **tx)
    .await?;

    for (quest_id, target) in quests {
        sqlx::query("SAVEPOINT quest_step")
            .execute(&mut **tx)
            .await?;

        let current: f64 = sqlx::query_scalar(
            "INSERT INTO quest_progress (quest_id, player_id, current) VALUES ($1, $2, $3) \
             ON CONFLICT (quest_id, player_id) \
             DO UPDATE SET current = quest_progress.current + EXCLUDED.current \
             RETURNING current",
        )
        .bind(quest_id)
        .bind(player_id)
        .bind(delta)
        .fetch_one(&mut **tx)
        .await?;

        if current >= target {
            let winner: Option<Option<String>> =
                sqlx::query_scalar("SELECT winner_id FROM quests WHERE id = $1 FOR UPDATE")
                    .bind(quest_id)
                    .fetch_optional(&mut **tx)
                    .await?;
            match winner {
                Some(None) => {
                    sqlx::query("UPDATE quests SET winner_id = $2, active = FALSE WHERE id = $1")
                        .bind(quest_id)
                        .bind(player_id)
                        .execute(&mut **tx)
                        .await?;
                    sqlx::query("RELEASE SAVEPOINT quest_step")
                        .execute(&mut **tx)
                        .await?;
                    outcome.completed.push(QuestWin {
                        quest_id,
                        winner_id: player_id.to_string(),
                    });
                }
                _ => {
                    // Someone else won first (or the quest vanished):
                    // undo this quest's progress write only.
                    sqlx::query("ROLLBACK TO SAVEPOINT quest_step")
                        .execute(&mut **tx)
                        .await?;
                }
            }
        } else {
            sqlx::query("RELEASE SAVEPOINT quest_step")
                .execute(&mut **tx)
                .await?;
            outcome.progress.push(QuestProgress {
                quest_id,
                current,
                target,
            });
        }
    }

    Ok(outcome)
}
