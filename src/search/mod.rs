//! Tantivy-based user search index.
//!
//! Indexes usernames and role names, with role matches weighted well above
//! username matches.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::User;

const BOOST_USERNAME: f32 = 1.0;
const BOOST_ROLE: f32 = 10.0;

/// Search result with user id and relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub user_id: String,
    pub score: f32,
}

struct SearchFields {
    user_id: Field,
    username: Field,
    role: Field,
}

/// Full-text index over users.
pub struct UserIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl UserIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        let user_id = schema_builder.add_text_field("user_id", STRING | STORED);
        let username = schema_builder.add_text_field("username", TEXT);
        let role = schema_builder.add_text_field("role", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            user_id,
            username,
            role,
        };

        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        // The user set is small; one indexing thread is plenty.
        let writer = index
            .writer_with_num_threads(1, 20_000_000)
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Rebuild the entire index from users.
    pub async fn rebuild(&self, users: &[User]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for user in users {
            writer.add_document(self.create_document(user))?;
        }
        writer.commit()?;

        self.reader.reload()?;

        tracing::info!("User index rebuilt with {} users", users.len());
        Ok(())
    }

    /// Index a single user, replacing any previous entry.
    pub async fn index_user(&self, user: &User) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.user_id, &user.id));
        writer.add_document(self.create_document(user))?;
        writer.commit()?;

        self.reader.reload()?;
        Ok(())
    }

    /// Remove a user from the index.
    pub async fn remove_user(&self, user_id: &str) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.user_id, user_id));
        writer.commit()?;

        self.reader.reload()?;
        Ok(())
    }

    /// Search for users matching the query.
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<SearchResult>, AppError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let base_query = QueryParser::for_index(
            &self.index,
            vec![self.fields.username, self.fields.role],
        )
        .parse_query(query_str)
        .map_err(|e| AppError::Search(format!("Invalid search query: {}", e)))?;

        let mut subqueries: Vec<(Occur, Box<dyn tantivy::query::Query>)> = Vec::new();
        for (field, boost) in [
            (self.fields.username, BOOST_USERNAME),
            (self.fields.role, BOOST_ROLE),
        ] {
            let field_parser = QueryParser::for_index(&self.index, vec![field]);
            if let Ok(field_query) = field_parser.parse_query(query_str) {
                subqueries.push((Occur::Should, Box::new(BoostQuery::new(field_query, boost))));
            }
        }

        let combined_query = if subqueries.is_empty() {
            base_query
        } else {
            Box::new(BooleanQuery::new(subqueries))
        };

        let top_docs = searcher
            .search(&combined_query, &TopDocs::with_limit(limit))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let results = top_docs
            .into_iter()
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let user_id = doc.get_first(self.fields.user_id)?.as_str()?.to_string();
                Some(SearchResult { user_id, score })
            })
            .collect();

        Ok(results)
    }

    fn create_document(&self, user: &User) -> TantivyDocument {
        doc!(
            self.fields.user_id => user.id.clone(),
            self.fields.username => user.username.clone(),
            self.fields.role => format!("{} {}", user.role.as_str(), user.role.as_i64())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PersonalSettings, Role};
    use chrono::Utc;
    use tempfile::TempDir;

    fn create_test_user(id: &str, username: &str, role: Role) -> User {
        User {
            id: id.to_string(),
            username: username.to_string(),
            password: String::new(),
            role,
            register_date: Utc::now(),
            personal_settings: PersonalSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_role_outranks_username() {
        let temp_dir = TempDir::new().unwrap();
        let index = UserIndex::open(temp_dir.path()).unwrap();

        let users = vec![
            create_test_user("1", "manager", Role::Guest),
            create_test_user("2", "dana", Role::Manager),
        ];
        index.rebuild(&users).await.unwrap();

        let results = index.search("manager", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].user_id, "2");
    }

    #[tokio::test]
    async fn test_index_and_remove_user() {
        let temp_dir = TempDir::new().unwrap();
        let index = UserIndex::open(temp_dir.path()).unwrap();

        let user = create_test_user("7", "release-bot", Role::User);
        index.index_user(&user).await.unwrap();
        assert_eq!(index.search("bot", 10).unwrap().len(), 1);

        // Re-indexing replaces rather than duplicates.
        index.index_user(&user).await.unwrap();
        assert_eq!(index.search("bot", 10).unwrap().len(), 1);

        index.remove_user("7").await.unwrap();
        assert!(index.search("bot", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_empty_query() {
        let temp_dir = TempDir::new().unwrap();
        let index = UserIndex::open(temp_dir.path()).unwrap();

        assert!(index.search("   ", 10).unwrap().is_empty());
    }
}
