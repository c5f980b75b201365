use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Favorite {
    pub id: Uuid,
    pub user_id: Uuid,
    pub restaurant_id: Uuid,
    pub notes: String,
    pub tags: Vec<String>,
    pub visit_count: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_visited_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

impl Favorite {
    pub fn new(user_id: Uuid, restaurant_id: Uuid) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            user_id,
            restaurant_id,
            notes: String::new(),
            tags: Vec::new(),
            visit_count: 0,
            last_visited_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn add_visit(&mut self) {
        let now = OffsetDateTime::now_utc();
        self.visit_count += 1;
        self.last_visited_at = Some(now);
        self.updated_at = now;
    }

    pub fn update_notes(&mut self, notes: impl Into<String>) {
        self.notes = notes.into();
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn add_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if tag.is_empty() || self.has_tag(tag) {
            return;
        }
        self.tags.push(tag.to_string());
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn remove_tag(&mut self, tag: &str) {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        if self.tags.len() != before {
            self.updated_at = OffsetDateTime::now_utc();
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags.clear();
        for tag in tags {
            self.add_tag(&tag);
        }
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn soft_delete(&mut self) {
        let now = OffsetDateTime::now_utc();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_ignore_blanks_and_duplicates() {
        let mut favorite = Favorite::new(Uuid::new_v4(), Uuid::new_v4());
        favorite.add_tag("ramen");
        favorite.add_tag("ramen");
        favorite.add_tag("  ");
        assert_eq!(favorite.tags, vec!["ramen".to_string()]);

        favorite.set_tags(vec!["date".into(), "".into(), "date".into(), "late".into()]);
        assert_eq!(favorite.tags, vec!["date".to_string(), "late".to_string()]);

        favorite.remove_tag("date");
        assert!(!favorite.has_tag("date"));
        assert!(favorite.has_tag("late"));
    }

    #[test]
    fn visits_are_counted() {
        let mut favorite = Favorite::new(Uuid::new_v4(), Uuid::new_v4());
        favorite.add_visit();
        favorite.add_visit();
        assert_eq!(favorite.visit_count, 2);
        assert!(favorite.last_visited_at.is_some());
    }
}
