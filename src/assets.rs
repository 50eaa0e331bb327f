use rust_embed::RustEmbed;

/// Embedded database migrations
#[derive(RustEmbed)]
#[folder = "src/database/migrations/"]
#[prefix = "migrations/"]
pub struct MigrationAssets;

impl MigrationAssets {
    /// Get a migration file by path
    pub fn get_migration(path: &str) -> Option<rust_embed::EmbeddedFile> {
        Self::get(path)
    }

    /// Get all migration files in order
    pub fn get_migrations() -> Vec<(String, String)> {
        let mut migrations: Vec<(String, String)> = Self::iter()
            .filter(|path| path.ends_with(".sql"))
            .filter_map(|path| {
                let file = Self::get(&path)?;
                let content = String::from_utf8_lossy(&file.data).to_string();
                let name = path
                    .strip_prefix("migrations/")
                    .unwrap_or(&path)
                    .to_string();
                Some((name, content))
            })
            .collect();

        // Sort migrations by filename to ensure proper order
        migrations.sort_by(|a, b| a.0.cmp(&b.0));
        migrations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_assets_exist() {
        let migration_list = MigrationAssets::get_migrations();
        assert!(
            !migration_list.is_empty(),
            "Should have at least one migration"
        );

        for i in 1..migration_list.len() {
            assert!(
                migration_list[i - 1].0 <= migration_list[i].0,
                "Migrations should be sorted by name"
            );
        }
    }

    #[test]
    fn test_migrations_are_schema_qualified() {
        for (name, content) in MigrationAssets::get_migrations() {
            assert!(
                content.contains("{schema}."),
                "{name} should qualify its tables with the schema placeholder"
            );
        }
    }

    #[test]
    fn test_nonexistent_migration() {
        assert!(MigrationAssets::get_migration("migrations/999_missing.sql").is_none());
        assert!(MigrationAssets::get_migration("migrations/001_initial_schema.sql").is_some());
    }
}
