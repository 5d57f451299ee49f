use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ModuleId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("module ids must be contiguous from 0: expected {expected}, found {found}")]
    NonContiguous { expected: u32, found: ModuleId },

    #[error("module {module} has no questions")]
    EmptyModule { module: ModuleId },
}

/// Metadata for one module: its position, display title, and question count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    id: ModuleId,
    title: String,
    question_count: u32,
}

impl ModuleInfo {
    #[must_use]
    pub fn new(id: ModuleId, title: impl Into<String>, question_count: u32) -> Self {
        Self {
            id,
            title: title.into(),
            question_count,
        }
    }

    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn question_count(&self) -> u32 {
        self.question_count
    }
}

/// Ordered, read-only view of the module content this session plays against.
///
/// The engine never looks inside questions; the catalog exists purely for
/// bounds: how many modules there are and how many questions each holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleCatalog {
    modules: Vec<ModuleInfo>,
}

impl ModuleCatalog {
    /// Build a catalog from ordered module infos.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::NonContiguous` if ids are not `0..n` in order,
    /// or `CatalogError::EmptyModule` for a module without questions.
    pub fn new(modules: Vec<ModuleInfo>) -> Result<Self, CatalogError> {
        for (index, info) in modules.iter().enumerate() {
            let expected = u32::try_from(index).unwrap_or(u32::MAX);
            if info.id.value() != expected {
                return Err(CatalogError::NonContiguous {
                    expected,
                    found: info.id,
                });
            }
            if info.question_count == 0 {
                return Err(CatalogError::EmptyModule { module: info.id });
            }
        }
        Ok(Self { modules })
    }

    /// Build a catalog from question counts alone, with generated titles.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::EmptyModule` if any count is zero.
    pub fn from_counts(counts: &[u32]) -> Result<Self, CatalogError> {
        let modules = counts
            .iter()
            .enumerate()
            .map(|(index, count)| {
                let id = ModuleId::new(u32::try_from(index).unwrap_or(u32::MAX));
                ModuleInfo::new(id, format!("Module {}", index + 1), *count)
            })
            .collect();
        Self::new(modules)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    #[must_use]
    pub fn contains(&self, module: ModuleId) -> bool {
        (module.value() as usize) < self.modules.len()
    }

    #[must_use]
    pub fn get(&self, module: ModuleId) -> Option<&ModuleInfo> {
        self.modules.get(module.value() as usize)
    }

    #[must_use]
    pub fn question_count(&self, module: ModuleId) -> Option<u32> {
        self.get(module).map(ModuleInfo::question_count)
    }

    /// The highest module id, if the catalog is non-empty.
    #[must_use]
    pub fn last_module(&self) -> Option<ModuleId> {
        let len = u32::try_from(self.modules.len()).ok()?;
        len.checked_sub(1).map(ModuleId::new)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules.iter()
    }
}
