#![forbid(unsafe_code)]

use super::super::StoreError;
use rusqlite::{Connection, params};

const SCHEMA_VERSION: &str = "v1";

const SQL: &str = r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        -- Each inserted row mints one tree id (its rowid).
        CREATE TABLE IF NOT EXISTS tree_id_mint (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channels (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          main_tree_id TEXT,
          created_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS nodes (
          id TEXT PRIMARY KEY,
          node_id TEXT NOT NULL,
          content_id TEXT NOT NULL,
          parent_id TEXT,
          tree_id INTEGER NOT NULL,
          lft INTEGER NOT NULL,
          rght INTEGER NOT NULL,
          level INTEGER NOT NULL,
          sort_order REAL NOT NULL DEFAULT 1,
          kind TEXT NOT NULL,
          title TEXT NOT NULL DEFAULT '',
          description TEXT NOT NULL DEFAULT '',
          language_id TEXT,
          license_id TEXT,
          license_description TEXT,
          thumbnail_encoding TEXT,
          extra_fields TEXT NOT NULL DEFAULT '{}',
          copyright_holder TEXT NOT NULL DEFAULT '',
          author TEXT NOT NULL DEFAULT '',
          aggregator TEXT NOT NULL DEFAULT '',
          provider TEXT NOT NULL DEFAULT '',
          role_visibility TEXT NOT NULL DEFAULT 'learner',
          grade_levels TEXT,
          resource_types TEXT,
          learning_activities TEXT,
          accessibility_labels TEXT,
          categories TEXT,
          learner_needs TEXT,
          suggested_duration INTEGER,
          freeze_authoring_data INTEGER NOT NULL DEFAULT 0,
          original_channel_id TEXT,
          original_source_node_id TEXT,
          source_channel_id TEXT,
          source_node_id TEXT,
          cloned_source_id TEXT,
          original_node_id TEXT,
          changed INTEGER NOT NULL DEFAULT 1,
          complete INTEGER NOT NULL DEFAULT 0,
          published INTEGER NOT NULL DEFAULT 0,
          modified_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS assessment_items (
          id TEXT PRIMARY KEY,
          contentnode_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
          assessment_id TEXT NOT NULL,
          item_type TEXT NOT NULL,
          question TEXT NOT NULL DEFAULT '',
          answers TEXT NOT NULL DEFAULT '[]',
          hints TEXT NOT NULL DEFAULT '[]',
          raw_data TEXT NOT NULL DEFAULT '',
          source_url TEXT,
          randomize INTEGER NOT NULL DEFAULT 0,
          sort_order INTEGER NOT NULL DEFAULT 1,
          UNIQUE(contentnode_id, assessment_id)
        );

        CREATE TABLE IF NOT EXISTS files (
          id TEXT PRIMARY KEY,
          checksum TEXT NOT NULL,
          file_size INTEGER NOT NULL,
          file_format TEXT NOT NULL,
          preset TEXT,
          language_id TEXT,
          original_filename TEXT,
          contentnode_id TEXT REFERENCES nodes(id) ON DELETE CASCADE,
          assessment_item_id TEXT REFERENCES assessment_items(id) ON DELETE CASCADE,
          CHECK(contentnode_id IS NULL OR assessment_item_id IS NULL)
        );

        CREATE TABLE IF NOT EXISTS content_tags (
          id TEXT PRIMARY KEY,
          tag_name TEXT NOT NULL,
          channel_id TEXT REFERENCES channels(id) ON DELETE CASCADE,
          UNIQUE(tag_name, channel_id)
        );

        CREATE TABLE IF NOT EXISTS node_tags (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          contentnode_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
          contenttag_id TEXT NOT NULL REFERENCES content_tags(id) ON DELETE CASCADE,
          UNIQUE(contentnode_id, contenttag_id)
        );

        -- No foreign keys: rows may outlive their nodes and are cleaned up lazily.
        CREATE TABLE IF NOT EXISTS prerequisites (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          target_node_id TEXT NOT NULL,
          prerequisite_id TEXT NOT NULL,
          UNIQUE(target_node_id, prerequisite_id)
        );

        CREATE INDEX IF NOT EXISTS idx_nodes_tree_lft ON nodes(tree_id, lft);
        CREATE INDEX IF NOT EXISTS idx_nodes_tree_rght ON nodes(tree_id, rght);
        CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);
        CREATE INDEX IF NOT EXISTS idx_nodes_node_id ON nodes(node_id);
        CREATE INDEX IF NOT EXISTS idx_files_node ON files(contentnode_id);
        CREATE INDEX IF NOT EXISTS idx_files_item ON files(assessment_item_id);
        CREATE INDEX IF NOT EXISTS idx_items_node ON assessment_items(contentnode_id);
        CREATE INDEX IF NOT EXISTS idx_node_tags_node ON node_tags(contentnode_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_content_tags_global
          ON content_tags(tag_name) WHERE channel_id IS NULL;
"#;

pub(in crate::store) fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", SCHEMA_VERSION],
    )?;
    Ok(())
}
