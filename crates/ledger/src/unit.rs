//! Unit of measure conversion into base units.

use serde::{Deserialize, Serialize};

use rxstock_core::{DomainError, DomainResult, ValueObject};

/// A sellable/countable unit and how many base units it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfMeasure {
    pub name: String,
    /// Base units per one of this unit (>= 1).
    pub factor: i64,
}

impl ValueObject for UnitOfMeasure {}

/// Units known for an item. The base unit always has factor 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUnits {
    base_unit: String,
    units: Vec<UnitOfMeasure>,
}

impl ItemUnits {
    pub fn new(base_unit: impl Into<String>) -> Self {
        let base_unit = base_unit.into();
        Self {
            units: vec![UnitOfMeasure {
                name: base_unit.clone(),
                factor: 1,
            }],
            base_unit,
        }
    }

    /// Add a larger unit (e.g. "strip" = 10 tablets, "box" = 30 tablets).
    pub fn with_unit(mut self, name: impl Into<String>, factor: i64) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("unit name cannot be empty"));
        }
        if factor < 1 {
            return Err(DomainError::validation(format!(
                "unit '{name}' must hold at least one base unit"
            )));
        }
        if self.find(&name).is_some() {
            return Err(DomainError::validation(format!("unit '{name}' already defined")));
        }
        self.units.push(UnitOfMeasure { name, factor });
        Ok(self)
    }

    pub fn base_unit(&self) -> &str {
        &self.base_unit
    }

    pub fn units(&self) -> &[UnitOfMeasure] {
        &self.units
    }

    fn find(&self, name: &str) -> Option<&UnitOfMeasure> {
        let wanted = name.trim();
        self.units
            .iter()
            .find(|u| u.name.eq_ignore_ascii_case(wanted))
    }

    pub fn factor_of(&self, unit: &str) -> DomainResult<i64> {
        self.find(unit)
            .map(|u| u.factor)
            .ok_or_else(|| DomainError::validation(format!("unknown unit '{}'", unit.trim())))
    }

    /// Convert `quantity` of `unit` into base units.
    pub fn to_base(&self, quantity: i64, unit: &str) -> DomainResult<i64> {
        let factor = self.factor_of(unit)?;
        quantity
            .checked_mul(factor)
            .ok_or_else(|| DomainError::validation("quantity overflows base units"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tablets() -> ItemUnits {
        ItemUnits::new("tablet")
            .with_unit("strip", 10)
            .unwrap()
            .with_unit("box", 30)
            .unwrap()
    }

    #[test]
    fn base_unit_has_factor_one() {
        assert_eq!(tablets().to_base(7, "tablet").unwrap(), 7);
    }

    #[test]
    fn converts_pack_units_case_insensitively() {
        let units = tablets();
        assert_eq!(units.to_base(2, "Box").unwrap(), 60);
        assert_eq!(units.to_base(3, " strip ").unwrap(), 30);
    }

    #[test]
    fn unknown_unit_is_a_validation_error() {
        assert!(matches!(
            tablets().to_base(1, "bottle"),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn rejects_duplicate_and_empty_units() {
        assert!(tablets().with_unit("BOX", 12).is_err());
        assert!(tablets().with_unit("crate", 0).is_err());
    }
}
