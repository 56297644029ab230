//! Compiled field access rules.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rowguard_policy::ConfigurationError;
use rowguard_types::AuthContext;
use tracing::debug;

use crate::schema::{FieldAccessConfig, FieldAccessSchema, FieldDefault, TableFieldAccess};

/// A registered table's column rules.
#[derive(Debug, Clone)]
pub struct CompiledFieldTable {
    name: String,
    default: FieldDefault,
    skip_for: BTreeSet<String>,
    fields: Vec<(String, FieldAccessConfig)>,
    index: HashMap<String, usize>,
}

impl CompiledFieldTable {
    fn compile(name: String, table: TableFieldAccess) -> Result<Self, ConfigurationError> {
        if name.is_empty() {
            return Err(ConfigurationError::EmptyTableName);
        }

        let mut index = HashMap::with_capacity(table.fields.len());
        for (position, (field, _)) in table.fields.iter().enumerate() {
            if index.insert(field.clone(), position).is_some() {
                return Err(ConfigurationError::DuplicateField {
                    table: name,
                    field: field.clone(),
                });
            }
        }

        Ok(Self {
            name,
            default: table.default,
            skip_for: table.skip_for,
            fields: table.fields,
            index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_access(&self) -> FieldDefault {
        self.default
    }

    pub fn skip_for(&self) -> &BTreeSet<String> {
        &self.skip_for
    }

    /// Configured field names in declaration order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldAccessConfig> {
        self.index.get(name).map(|&i| &self.fields[i].1)
    }

    pub fn is_skipped_for(&self, auth: &AuthContext) -> bool {
        auth.roles.iter().any(|role| self.skip_for.contains(role))
    }
}

/// Column rules for every registered table.
#[derive(Debug, Clone, Default)]
pub struct FieldAccessRegistry {
    tables: BTreeMap<String, CompiledFieldTable>,
}

impl FieldAccessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_schema(schema: FieldAccessSchema) -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        registry.load_schema(schema)?;
        Ok(registry)
    }

    pub fn register(
        &mut self,
        table: impl Into<String>,
        access: TableFieldAccess,
    ) -> Result<(), ConfigurationError> {
        let table = table.into();
        if self.tables.contains_key(&table) {
            return Err(ConfigurationError::DuplicateTable { table });
        }

        let compiled = CompiledFieldTable::compile(table.clone(), access)?;
        debug!(
            table = %table,
            fields = compiled.fields.len(),
            default = ?compiled.default,
            "Registered field access table"
        );
        self.tables.insert(table, compiled);
        Ok(())
    }

    /// Registers each table in declaration order, stopping at the first error.
    pub fn load_schema(&mut self, schema: FieldAccessSchema) -> Result<(), ConfigurationError> {
        for (table, access) in schema.tables {
            self.register(table, access)?;
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&CompiledFieldTable> {
        self.tables.get(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}
