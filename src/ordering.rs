//! Linear display order over categories.

use serde::Serialize;
use tracing::info;

use crate::db::{Category, Database, Direction};
use crate::error::ValidationError;

/// What a move request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MoveOutcome {
    Moved,
    /// Already first, nothing changed
    FirstElement,
    /// Already last, nothing changed
    LastElement,
}

impl MoveOutcome {
    pub fn message(&self) -> Option<&'static str> {
        match self {
            MoveOutcome::Moved => None,
            MoveOutcome::FirstElement => Some("First element"),
            MoveOutcome::LastElement => Some("Last element"),
        }
    }
}

/// Swap a category with its predecessor. `None` when the category is unknown.
pub async fn move_up(db: &Database, id: i64) -> anyhow::Result<Option<MoveOutcome>> {
    shift(db, id, Direction::Up).await
}

/// Swap a category with its successor. `None` when the category is unknown.
pub async fn move_down(db: &Database, id: i64) -> anyhow::Result<Option<MoveOutcome>> {
    shift(db, id, Direction::Down).await
}

async fn shift(db: &Database, id: i64, direction: Direction) -> anyhow::Result<Option<MoveOutcome>> {
    let Some(category) = db.get_category(id).await? else {
        return Ok(None);
    };

    let Some(neighbor) = db.category_neighbor(category.order, direction).await? else {
        return Ok(Some(match direction {
            Direction::Up => MoveOutcome::FirstElement,
            Direction::Down => MoveOutcome::LastElement,
        }));
    };

    db.swap_category_order(&category, &neighbor).await?;
    info!(
        category_id = category.id,
        neighbor_id = neighbor.id,
        ?direction,
        "Category moved"
    );
    Ok(Some(MoveOutcome::Moved))
}

/// Create a category at the end of the order.
pub async fn create_category(db: &Database, title: &str) -> Result<Category, CreateError> {
    let title = validate_title(title)?;
    Ok(db.create_category(title).await?)
}

pub fn validate_title(title: &str) -> Result<&str, ValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ValidationError::MissingField("title"));
    }
    Ok(title)
}

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;

    async fn titles(db: &Database) -> Vec<String> {
        db.list_categories()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.title)
            .collect()
    }

    async fn seed(db: &Database) -> Vec<Category> {
        let mut categories = Vec::new();
        for title in ["A", "B", "C"] {
            categories.push(create_category(db, title).await.unwrap());
        }
        categories
    }

    mod move_tests {
        use super::*;

        #[tokio::test]
        async fn test_move_up_swaps_with_predecessor() {
            let db = create_test_db().await;
            let categories = seed(&db).await;

            let outcome = move_up(&db, categories[2].id).await.unwrap();
            assert_eq!(outcome, Some(MoveOutcome::Moved));
            assert_eq!(titles(&db).await, vec!["A", "C", "B"]);
        }

        #[tokio::test]
        async fn test_move_down_swaps_with_successor() {
            let db = create_test_db().await;
            let categories = seed(&db).await;

            let outcome = move_down(&db, categories[0].id).await.unwrap();
            assert_eq!(outcome, Some(MoveOutcome::Moved));
            assert_eq!(titles(&db).await, vec!["B", "A", "C"]);
        }

        #[tokio::test]
        async fn test_first_element_is_noop() {
            let db = create_test_db().await;
            let categories = seed(&db).await;

            let outcome = move_up(&db, categories[0].id).await.unwrap();
            assert_eq!(outcome, Some(MoveOutcome::FirstElement));
            assert_eq!(outcome.unwrap().message(), Some("First element"));
            assert_eq!(titles(&db).await, vec!["A", "B", "C"]);
        }

        #[tokio::test]
        async fn test_last_element_is_noop() {
            let db = create_test_db().await;
            let categories = seed(&db).await;

            let outcome = move_down(&db, categories[2].id).await.unwrap();
            assert_eq!(outcome, Some(MoveOutcome::LastElement));
            assert_eq!(titles(&db).await, vec!["A", "B", "C"]);
        }

        #[tokio::test]
        async fn test_moves_skip_deleted_neighbor() {
            let db = create_test_db().await;
            let categories = seed(&db).await;
            db.delete_category(categories[1].id).await.unwrap();

            move_up(&db, categories[2].id).await.unwrap();
            assert_eq!(titles(&db).await, vec!["C", "A"]);
        }

        #[tokio::test]
        async fn test_unknown_or_deleted_category() {
            let db = create_test_db().await;
            let categories = seed(&db).await;
            db.delete_category(categories[0].id).await.unwrap();

            assert_eq!(move_up(&db, 999).await.unwrap(), None);
            assert_eq!(move_down(&db, categories[0].id).await.unwrap(), None);
        }

        #[tokio::test]
        async fn test_up_then_down_restores_order() {
            let db = create_test_db().await;
            let categories = seed(&db).await;

            move_up(&db, categories[1].id).await.unwrap();
            move_down(&db, categories[1].id).await.unwrap();
            assert_eq!(titles(&db).await, vec!["A", "B", "C"]);
        }
    }

    mod create_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_appends() {
            let db = create_test_db().await;
            let categories = seed(&db).await;
            let orders: Vec<i64> = categories.iter().map(|c| c.order).collect();
            assert_eq!(orders, vec![1, 2, 3]);
        }

        #[tokio::test]
        async fn test_create_trims_title() {
            let db = create_test_db().await;
            let category = create_category(&db, "  Tech  ").await.unwrap();
            assert_eq!(category.title, "Tech");
        }

        #[tokio::test]
        async fn test_blank_title_rejected() {
            let db = create_test_db().await;
            let result = create_category(&db, "   ").await;
            assert!(matches!(
                result,
                Err(CreateError::Validation(ValidationError::MissingField("title")))
            ));
            assert!(db.list_categories().await.unwrap().is_empty());
        }
    }
}
