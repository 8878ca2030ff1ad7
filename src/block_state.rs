use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

/// A block state: a namespaced name plus its properties, e.g.
/// `minecraft:oak_log{axis=y}`. Properties are kept sorted by key so the
/// canonical form (and therefore equality) is independent of insertion
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockState {
    pub name: SmolStr,
    properties: Vec<(SmolStr, SmolStr)>,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.properties.is_empty() {
            write!(f, "[{}]", self.properties_string())?;
        }
        Ok(())
    }
}

impl Hash for BlockState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        for (k, v) in &self.properties {
            k.hash(state);
            v.hash(state);
        }
    }
}

impl BlockState {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        BlockState {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    pub fn get_name(&self) -> &str {
        self.name.as_str()
    }

    pub fn with_property(mut self, key: impl Into<SmolStr>, value: impl Into<SmolStr>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn set_property(&mut self, key: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        let key = key.into();
        let value = value.into();
        match self.properties.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(i) => self.properties[i].1 = value,
            Err(i) => self.properties.insert(i, (key, value)),
        }
    }

    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.properties
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|i| self.properties[i].1.as_str())
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.get_property(key).is_some()
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Sorted `key=value` entries joined with commas. Two block states are
    /// equal iff their names and properties strings match.
    pub fn properties_string(&self) -> String {
        let mut out = String::new();
        for (i, (key, value)) in self.properties.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(key);
            out.push('=');
            out.push_str(value);
        }
        out
    }

    /// Parses a `key=value,key=value` properties string, as produced by
    /// [`BlockState::properties_string`].
    pub fn parse(name: &str, properties: &str) -> Self {
        let mut state = BlockState::new(name);
        for part in properties.split(',') {
            if let Some((key, value)) = part.split_once('=') {
                state.set_property(key, value);
            }
        }
        state
    }
}

/// Interns every distinct observed [`BlockState`] under a dense 16-bit id.
///
/// Reads vastly outnumber inserts (an insert happens once per distinct
/// state per process), so lookup takes the read lock and only upgrades on
/// a miss. Ids are never reassigned; callers may hold on to raw ids for
/// the whole render.
pub struct BlockStateRegistry {
    inner: RwLock<RegistryInner>,
}

struct RegistryInner {
    // name -> properties string -> id
    lookup: HashMap<SmolStr, HashMap<String, u16>>,
    states: Vec<BlockState>,
}

impl Default for BlockStateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStateRegistry {
    pub fn new() -> Self {
        BlockStateRegistry {
            inner: RwLock::new(RegistryInner {
                lookup: HashMap::new(),
                states: Vec::new(),
            }),
        }
    }

    /// Returns the id of `state`, interning it first if it has not been
    /// seen before.
    pub fn get_block_id(&self, state: &BlockState) -> u16 {
        let props = state.properties_string();
        {
            let inner = self.inner.read().unwrap();
            if let Some(id) = inner
                .lookup
                .get(&state.name)
                .and_then(|by_props| by_props.get(&props))
            {
                return *id;
            }
        }

        let mut inner = self.inner.write().unwrap();
        // another thread may have interned it between the locks
        if let Some(id) = inner
            .lookup
            .get(&state.name)
            .and_then(|by_props| by_props.get(&props))
        {
            return *id;
        }
        let id = inner.states.len() as u16;
        inner.states.push(state.clone());
        inner
            .lookup
            .entry(state.name.clone())
            .or_default()
            .insert(props, id);
        id
    }

    /// Looks up a previously interned state. Unknown ids return air.
    pub fn get_block_state(&self, id: u16) -> BlockState {
        let inner = self.inner.read().unwrap();
        inner
            .states
            .get(id as usize)
            .cloned()
            .unwrap_or_else(|| BlockState::new("minecraft:air"))
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
