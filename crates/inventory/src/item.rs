use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, ItemId};

/// Position of an item in the production chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    /// Purchased input (e.g. preforms).
    Raw,
    /// Produced and consumed again (e.g. blown bottles awaiting capping).
    Intermediate,
    /// Sold unit.
    Final,
}

impl core::fmt::Display for ItemCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ItemCategory::Raw => "raw",
            ItemCategory::Intermediate => "intermediate",
            ItemCategory::Final => "final",
        })
    }
}

/// Catalog record for a stocked item.
///
/// Identity is fixed at creation; name, category and unit may be edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    id: ItemId,
    name: String,
    category: ItemCategory,
    unit: String,
}

impl Item {
    pub fn new(
        id: ItemId,
        name: impl Into<String>,
        category: ItemCategory,
        unit: impl Into<String>,
    ) -> DomainResult<Self> {
        let mut item = Self {
            id,
            name: String::new(),
            category,
            unit: String::new(),
        };
        item.rename(name)?;
        item.set_unit(unit)?;
        Ok(item)
    }

    pub fn id_typed(&self) -> ItemId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> ItemCategory {
        self.category
    }

    /// Unit of measure ("pcs", "kg", ...).
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn rename(&mut self, name: impl Into<String>) -> DomainResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("item name cannot be empty"));
        }
        self.name = name.trim().to_string();
        Ok(())
    }

    pub fn set_unit(&mut self, unit: impl Into<String>) -> DomainResult<()> {
        let unit = unit.into();
        if unit.trim().is_empty() {
            return Err(DomainError::validation("unit of measure cannot be empty"));
        }
        self.unit = unit.trim().to_string();
        Ok(())
    }

    pub fn set_category(&mut self, category: ItemCategory) {
        self.category = category;
    }
}

impl Entity for Item {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
