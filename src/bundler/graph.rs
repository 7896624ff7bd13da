//! Module graph data structures

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::resolver::Resolution;
use crate::transform::Compiled;

/// Unique identifier for a module; also its position in discovery order
pub type ModuleId = usize;

/// Types of modules the bundler can handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleType {
    JavaScript,
    TypeScript,
    Jsx,
    Tsx,
    Css,
    Less,
    Json,
    Image,
    Font,
    Unknown,
}

impl ModuleType {
    /// Determine module type from file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "js" | "mjs" | "cjs" => ModuleType::JavaScript,
            "ts" | "mts" | "cts" => ModuleType::TypeScript,
            "jsx" => ModuleType::Jsx,
            "tsx" => ModuleType::Tsx,
            "css" => ModuleType::Css,
            "less" => ModuleType::Less,
            "json" => ModuleType::Json,
            "jpg" | "jpeg" | "png" | "gif" | "ico" | "svg" => ModuleType::Image,
            "woff" | "woff2" | "eot" | "ttf" => ModuleType::Font,
            _ => ModuleType::Unknown,
        }
    }

    /// Determine module type from path
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(ModuleType::from_extension)
            .unwrap_or(ModuleType::Unknown)
    }
}

/// A module in the dependency graph
#[derive(Debug, Clone)]
pub struct Module {
    /// Absolute path to the module
    pub path: PathBuf,

    /// Stable id used inside the artifact (path relative to the project)
    pub name: String,

    pub module_type: ModuleType,

    pub is_entry: bool,

    /// Specifiers required by the compiled code, in source order
    pub dependencies: Vec<String>,

    /// How each dependency specifier resolved
    pub resolutions: Vec<(String, Resolution)>,

    pub compiled: Compiled,
}

/// The module dependency graph
#[derive(Debug, Default)]
pub struct ModuleGraph {
    /// Modules in the order they were discovered
    modules: Vec<Module>,

    /// Map from path to module ID
    path_to_id: HashMap<PathBuf, ModuleId>,

    /// Dependency edges in require order
    edges: Vec<Vec<ModuleId>>,
}

impl ModuleGraph {
    /// Create a new empty module graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module to the graph
    pub fn add_module(&mut self, module: Module) -> ModuleId {
        if let Some(&id) = self.path_to_id.get(&module.path) {
            return id;
        }

        let id = self.modules.len();
        self.path_to_id.insert(module.path.clone(), id);
        self.modules.push(module);
        self.edges.push(Vec::new());

        id
    }

    /// Add a dependency edge between modules
    pub fn add_dependency(&mut self, from: ModuleId, to: ModuleId) {
        if let Some(deps) = self.edges.get_mut(from) {
            if !deps.contains(&to) {
                deps.push(to);
            }
        }
    }

    /// Get module ID from path
    pub fn get_module_id(&self, path: &Path) -> Option<ModuleId> {
        self.path_to_id.get(path).copied()
    }

    /// Get a module by ID
    pub fn get_module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    /// Get a mutable reference to a module
    pub fn get_module_mut(&mut self, id: ModuleId) -> Option<&mut Module> {
        self.modules.get_mut(id)
    }

    /// Modules in discovery order
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    /// Get direct dependencies of a module
    pub fn get_dependencies(&self, id: ModuleId) -> &[ModuleId] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Modules reachable from `start` in the order their bodies finish
    /// executing: dependencies before dependents, following require order.
    pub fn evaluation_order(&self, start: ModuleId) -> Vec<ModuleId> {
        let mut visited = vec![false; self.modules.len()];
        let mut order = Vec::with_capacity(self.modules.len());
        self.visit(start, &mut visited, &mut order);
        order
    }

    fn visit(&self, id: ModuleId, visited: &mut [bool], order: &mut Vec<ModuleId>) {
        if id >= visited.len() || visited[id] {
            return;
        }
        visited[id] = true;
        for &dep in self.get_dependencies(id) {
            self.visit(dep, visited, order);
        }
        order.push(id);
    }

    /// Total number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if graph is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
