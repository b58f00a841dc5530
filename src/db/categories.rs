use chrono::Utc;

use super::{Category, Database};

/// Which neighbour to look for when walking the category order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Nearest category with a smaller order
    Up,
    /// Nearest category with a larger order
    Down,
}

impl Database {
    pub async fn list_categories(&self) -> anyhow::Result<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(
            "SELECT * FROM live_categories ORDER BY sort_order ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    pub async fn get_category(&self, id: i64) -> anyhow::Result<Option<Category>> {
        let category = sqlx::query_as::<_, Category>("SELECT * FROM live_categories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(category)
    }

    /// Insert a category at the end of the order.
    ///
    /// The next order value is computed inside the INSERT itself, so two
    /// concurrent creates cannot read the same maximum.
    pub async fn create_category(&self, title: &str) -> anyhow::Result<Category> {
        let category = sqlx::query_as::<_, Category>(
            r#"
            INSERT INTO categories (title, sort_order, created_at)
            SELECT ?, COALESCE(MAX(sort_order), 0) + 1, ? FROM live_categories
            RETURNING *
            "#,
        )
        .bind(title)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(category)
    }

    pub async fn update_category_title(&self, id: i64, title: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE categories SET title = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(title)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_category(&self, id: i64) -> anyhow::Result<bool> {
        let result =
            sqlx::query("UPDATE categories SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(Utc::now())
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Closest live category strictly before or after `order`.
    pub async fn category_neighbor(
        &self,
        order: i64,
        direction: Direction,
    ) -> anyhow::Result<Option<Category>> {
        let query = match direction {
            Direction::Up => {
                "SELECT * FROM live_categories WHERE sort_order < ? ORDER BY sort_order DESC, id DESC LIMIT 1"
            }
            Direction::Down => {
                "SELECT * FROM live_categories WHERE sort_order > ? ORDER BY sort_order ASC, id ASC LIMIT 1"
            }
        };
        let category = sqlx::query_as::<_, Category>(query)
            .bind(order)
            .fetch_optional(&self.pool)
            .await?;
        Ok(category)
    }

    /// Exchange the order values of two categories in one transaction.
    pub async fn swap_category_order(&self, a: &Category, b: &Category) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE categories SET sort_order = ?, updated_at = ? WHERE id = ?")
            .bind(b.order)
            .bind(now)
            .bind(a.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE categories SET sort_order = ?, updated_at = ? WHERE id = ?")
            .bind(a.order)
            .bind(now)
            .bind(b.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
