//! Declarative SQLite schemas with version tracking and forward migrations.

mod versioned_schema;

pub use versioned_schema::{
    prepare_database, read_schema_version, Column, ForeignKey, ForeignKeyOnChange, SqlType, Table,
    VersionedSchema, BASE_DB_VERSION,
};
