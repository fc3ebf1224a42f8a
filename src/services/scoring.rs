use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    dao::{
        models::{AnswerEntity, SessionEntity},
        session_store::SessionStore,
    },
    error::ServiceError,
};

/// Points a letter-valid answer is worth before any bonus.
pub const BASE_POINTS: u32 = 10;
/// Extra points granted when nobody else submitted the same answer.
pub const UNIQUE_BONUS: u32 = 5;

/// Normalised form used for letter checks and duplicate detection.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Fill in `points` and `is_unique` for every answer of one round.
///
/// An answer is valid when it is non-blank and starts with the round letter
/// (case-insensitive, trimmed). Valid answers earn [`BASE_POINTS`];
/// `is_unique` is set when no other player submitted the same normalised
/// text for the same category. Invalid answers score 0 and are never unique.
pub fn score_answers(letter: char, answers: &mut [AnswerEntity]) {
    let letter = letter.to_ascii_lowercase();

    // Occurrences of each (category, normalised text) pair among valid answers.
    let mut occurrences: HashMap<(Uuid, String), u32> = HashMap::new();
    for answer in answers.iter() {
        let normalized = normalize(&answer.answer_text);
        if is_valid(&normalized, letter) {
            *occurrences
                .entry((answer.category_id, normalized))
                .or_default() += 1;
        }
    }

    for answer in answers.iter_mut() {
        let normalized = normalize(&answer.answer_text);
        if is_valid(&normalized, letter) {
            answer.points = BASE_POINTS;
            answer.is_unique = occurrences
                .get(&(answer.category_id, normalized))
                .copied()
                .unwrap_or(0)
                == 1;
        } else {
            answer.points = 0;
            answer.is_unique = false;
        }
    }
}

fn is_valid(normalized: &str, letter: char) -> bool {
    normalized.chars().next() == Some(letter)
}

/// Total score per player over a set of already-scored answers.
pub fn member_totals(answers: &[AnswerEntity]) -> HashMap<Uuid, u32> {
    let mut totals: HashMap<Uuid, u32> = HashMap::new();
    for answer in answers {
        let bonus = if answer.is_unique { UNIQUE_BONUS } else { 0 };
        *totals.entry(answer.player_id).or_default() += answer.points + bonus;
    }
    totals
}

/// Score the current round of `session` and overwrite member totals.
///
/// Persists `points`/`is_unique` on every answer row of the round, then
/// recomputes each member's score from scratch over all of the session's
/// scored answers and overwrites it. Re-running converges to the same rows,
/// so an accidental second trigger is harmless.
pub async fn score_round(
    store: &Arc<dyn SessionStore>,
    session: &SessionEntity,
) -> Result<Vec<AnswerEntity>, ServiceError> {
    let Some(letter) = session.current_letter else {
        return Err(ServiceError::PreconditionFailed(
            "round has no letter to score against".into(),
        ));
    };

    let mut round_answers = store
        .list_round_answers(session.id, session.current_round)
        .await?;
    score_answers(letter, &mut round_answers);
    for answer in &round_answers {
        store.update_answer(answer.clone()).await?;
    }

    let all_answers = store.list_session_answers(session.id).await?;
    let totals = member_totals(&all_answers);
    for mut member in store.list_members(session.id).await? {
        let total = totals.get(&member.player_id).copied().unwrap_or(0);
        if member.score != total {
            member.score = total;
            store.update_member(member).await?;
        }
    }

    Ok(round_answers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(player: Uuid, category: Uuid, text: &str) -> AnswerEntity {
        AnswerEntity {
            session_id: Uuid::new_v4(),
            player_id: player,
            round_number: 1,
            category_id: category,
            answer_text: text.to_string(),
            points: 0,
            is_unique: false,
        }
    }

    #[test]
    fn duplicated_valid_answers_score_base_without_uniqueness() {
        let category = Uuid::new_v4();
        let (p1, p2, p3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut answers = vec![
            answer(p1, category, "Casa"),
            answer(p2, category, "Casa"),
            answer(p3, category, ""),
        ];

        score_answers('C', &mut answers);

        assert_eq!(answers[0].points, BASE_POINTS);
        assert!(!answers[0].is_unique);
        assert_eq!(answers[1].points, BASE_POINTS);
        assert!(!answers[1].is_unique);
        assert_eq!(answers[2].points, 0);
        assert!(!answers[2].is_unique);
    }

    #[test]
    fn distinct_valid_answers_are_unique() {
        let category = Uuid::new_v4();
        let mut answers = vec![
            answer(Uuid::new_v4(), category, "Casa"),
            answer(Uuid::new_v4(), category, "Perro"),
        ];

        score_answers('C', &mut answers);

        assert_eq!(answers[0].points, BASE_POINTS);
        assert!(answers[0].is_unique);
        // "Perro" does not start with the round letter.
        assert_eq!(answers[1].points, 0);
        assert!(!answers[1].is_unique);
    }

    #[test]
    fn letter_check_is_case_insensitive_and_trimmed() {
        let category = Uuid::new_v4();
        let mut answers = vec![
            answer(Uuid::new_v4(), category, "  casa blanca "),
            answer(Uuid::new_v4(), category, "CASTILLO"),
            answer(Uuid::new_v4(), category, "Perro"),
        ];

        score_answers('c', &mut answers);

        assert_eq!(answers[0].points, BASE_POINTS);
        assert_eq!(answers[1].points, BASE_POINTS);
        assert_eq!(answers[2].points, 0);
    }

    #[test]
    fn duplicate_detection_ignores_case_and_whitespace() {
        let category = Uuid::new_v4();
        let mut answers = vec![
            answer(Uuid::new_v4(), category, "Casa"),
            answer(Uuid::new_v4(), category, " casa "),
        ];

        score_answers('C', &mut answers);

        assert!(!answers[0].is_unique);
        assert!(!answers[1].is_unique);
    }

    #[test]
    fn same_text_in_different_categories_stays_unique() {
        let player = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (cat_a, cat_b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut answers = vec![
            answer(player, cat_a, "Casa"),
            answer(other, cat_b, "Casa"),
        ];

        score_answers('C', &mut answers);

        assert!(answers[0].is_unique);
        assert!(answers[1].is_unique);
    }

    #[test]
    fn totals_sum_base_points_and_bonuses_per_player() {
        let player = Uuid::new_v4();
        let rival = Uuid::new_v4();
        let category = Uuid::new_v4();
        let mut scored = vec![
            answer(player, category, "Casa"),
            answer(player, Uuid::new_v4(), "Cielo"),
            answer(rival, category, "Casa"),
        ];
        score_answers('C', &mut scored);

        let totals = member_totals(&scored);

        // "Casa" is duplicated (base only), "Cielo" is unique (base + bonus).
        assert_eq!(totals[&player], BASE_POINTS * 2 + UNIQUE_BONUS);
        assert_eq!(totals[&rival], BASE_POINTS);
    }

    #[test]
    fn rescoring_is_idempotent() {
        let category = Uuid::new_v4();
        let mut answers = vec![
            answer(Uuid::new_v4(), category, "Casa"),
            answer(Uuid::new_v4(), category, "Cielo"),
        ];

        score_answers('C', &mut answers);
        let first_pass = answers.clone();
        score_answers('C', &mut answers);

        assert_eq!(answers, first_pass);
    }
}
