//! The domain model: a typed, mutable, hierarchical business-object graph.
//!
//! This is the engine's external collaborator made concrete: an arena-backed
//! store of environments, shells, submodels (and references to them), typed
//! submodel elements, concept descriptions and supplementary files. Every
//! object exposes a stable identity (its [`DomainKey`]), a settable parent
//! back-reference and kind-specific ordered child collections.
//!
//! The engine itself only ever *reads* this store. The mutation helpers here
//! play the role of the mutation collaborators: they edit the graph,
//! maintain parent back-references, and leave it to the caller to post the
//! matching change event.

use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Stable identity of one domain object.
    ///
    /// Keys are versioned, so a key held across a delete can never
    /// accidentally address an unrelated object that reused the slot.
    pub struct DomainKey;
}

/// Direction of an operation variable group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationDirection {
    Input,
    Output,
    InOut,
}

impl OperationDirection {
    /// Short label used in captions, tags and event location tags.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Input => "In",
            Self::Output => "Out",
            Self::InOut => "InOut",
        }
    }

    /// Parse a location-tag label back into a direction.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "In" => Some(Self::Input),
            "Out" => Some(Self::Output),
            "InOut" => Some(Self::InOut),
            _ => None,
        }
    }
}

/// The root object: ordered collections of everything in one package.
#[derive(Debug, Default, Clone)]
pub struct Environment {
    shells: Vec<DomainKey>,
    submodels: Vec<DomainKey>,
    concept_descriptions: Vec<DomainKey>,
    supplementary_files: Vec<DomainKey>,
}

impl Environment {
    pub fn shells(&self) -> &[DomainKey] {
        &self.shells
    }

    pub fn submodels(&self) -> &[DomainKey] {
        &self.submodels
    }

    pub fn concept_descriptions(&self) -> &[DomainKey] {
        &self.concept_descriptions
    }

    pub fn supplementary_files(&self) -> &[DomainKey] {
        &self.supplementary_files
    }
}

/// A shell: the top-level entity under which submodel references live.
#[derive(Debug, Clone)]
pub struct Shell {
    parent: Option<DomainKey>,
    id_short: String,
    id: String,
    submodel_refs: Vec<DomainKey>,
}

impl Shell {
    pub fn id_short(&self) -> &str {
        &self.id_short
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn submodel_refs(&self) -> &[DomainKey] {
        &self.submodel_refs
    }
}

/// A reference from a shell to a submodel.
///
/// This is a real object in the store, so a visual node projecting it can
/// carry the reference as its main data object and the target submodel as
/// its dereferenced main data object.
#[derive(Debug, Clone)]
pub struct SubmodelRef {
    parent: Option<DomainKey>,
    target: DomainKey,
}

impl SubmodelRef {
    pub fn target(&self) -> DomainKey {
        self.target
    }
}

/// A submodel: an identified, ordered collection of typed elements.
#[derive(Debug, Clone)]
pub struct Submodel {
    parent: Option<DomainKey>,
    id_short: Option<String>,
    id: String,
    elements: Vec<DomainKey>,
}

impl Submodel {
    pub fn id_short(&self) -> Option<&str> {
        self.id_short.as_deref()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn elements(&self) -> &[DomainKey] {
        &self.elements
    }
}

/// A concept description, referenced from elements via semantic identifiers.
#[derive(Debug, Clone)]
pub struct ConceptDescription {
    parent: Option<DomainKey>,
    id_short: Option<String>,
    id: String,
}

impl ConceptDescription {
    pub fn id_short(&self) -> Option<&str> {
        self.id_short.as_deref()
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// A supplementary file carried alongside the environment.
#[derive(Debug, Clone)]
pub struct SupplementaryFile {
    parent: Option<DomainKey>,
    path: String,
}

impl SupplementaryFile {
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// A typed submodel element.
#[derive(Debug, Clone)]
pub struct Element {
    parent: Option<DomainKey>,
    id_short: Option<String>,
    semantic_id: Option<String>,
    body: ElementBody,
}

impl Element {
    /// A value-carrying property.
    pub fn property(id_short: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_body(
            id_short,
            ElementBody::Property {
                value: value.into(),
            },
        )
    }

    /// An unordered collection of elements (order of insertion is kept).
    pub fn collection(id_short: impl Into<String>) -> Self {
        Self::with_body(
            id_short,
            ElementBody::Collection {
                children: Vec::new(),
            },
        )
    }

    /// An ordered list of elements.
    pub fn element_list(id_short: impl Into<String>) -> Self {
        Self::with_body(id_short, ElementBody::ElementList { items: Vec::new() })
    }

    /// An entity with statements.
    pub fn entity(id_short: impl Into<String>) -> Self {
        Self::with_body(
            id_short,
            ElementBody::Entity {
                statements: Vec::new(),
            },
        )
    }

    /// An operation with directional variable groups.
    pub fn operation(id_short: impl Into<String>) -> Self {
        Self::with_body(
            id_short,
            ElementBody::Operation {
                inputs: Vec::new(),
                outputs: Vec::new(),
                inouts: Vec::new(),
            },
        )
    }

    /// An annotated relationship.
    pub fn relationship(id_short: impl Into<String>) -> Self {
        Self::with_body(
            id_short,
            ElementBody::Relationship {
                annotations: Vec::new(),
            },
        )
    }

    fn with_body(id_short: impl Into<String>, body: ElementBody) -> Self {
        Self {
            parent: None,
            id_short: Some(id_short.into()),
            semantic_id: None,
            body,
        }
    }

    /// Attach a semantic identifier (matched against concept description ids).
    pub fn with_semantic_id(mut self, semantic_id: impl Into<String>) -> Self {
        self.semantic_id = Some(semantic_id.into());
        self
    }

    pub fn id_short(&self) -> Option<&str> {
        self.id_short.as_deref()
    }

    pub fn semantic_id(&self) -> Option<&str> {
        self.semantic_id.as_deref()
    }

    pub fn body(&self) -> &ElementBody {
        &self.body
    }
}

/// Kind-specific payload and child collections of an element.
#[derive(Debug, Clone)]
pub enum ElementBody {
    Property {
        value: String,
    },
    Collection {
        children: Vec<DomainKey>,
    },
    ElementList {
        items: Vec<DomainKey>,
    },
    Entity {
        statements: Vec<DomainKey>,
    },
    Operation {
        inputs: Vec<DomainKey>,
        outputs: Vec<DomainKey>,
        inouts: Vec<DomainKey>,
    },
    Relationship {
        annotations: Vec<DomainKey>,
    },
}

/// One object in the domain graph.
#[derive(Debug, Clone)]
pub enum DomainObject {
    Environment(Environment),
    Shell(Shell),
    SubmodelRef(SubmodelRef),
    Submodel(Submodel),
    ConceptDescription(ConceptDescription),
    SupplementaryFile(SupplementaryFile),
    Element(Element),
}

impl DomainObject {
    /// The parent back-reference, if any.
    pub fn parent(&self) -> Option<DomainKey> {
        match self {
            Self::Environment(_) => None,
            Self::Shell(s) => s.parent,
            Self::SubmodelRef(r) => r.parent,
            Self::Submodel(s) => s.parent,
            Self::ConceptDescription(c) => c.parent,
            Self::SupplementaryFile(f) => f.parent,
            Self::Element(e) => e.parent,
        }
    }

    fn set_parent(&mut self, parent: Option<DomainKey>) {
        match self {
            Self::Environment(_) => {}
            Self::Shell(s) => s.parent = parent,
            Self::SubmodelRef(r) => r.parent = parent,
            Self::Submodel(s) => s.parent = parent,
            Self::ConceptDescription(c) => c.parent = parent,
            Self::SupplementaryFile(f) => f.parent = parent,
            Self::Element(e) => e.parent = parent,
        }
    }

    /// Short kind name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Environment(_) => "Environment",
            Self::Shell(_) => "Shell",
            Self::SubmodelRef(_) => "SubmodelRef",
            Self::Submodel(_) => "Submodel",
            Self::ConceptDescription(_) => "ConceptDescription",
            Self::SupplementaryFile(_) => "SupplementaryFile",
            Self::Element(_) => "Element",
        }
    }
}

/// Arena-backed storage for the whole domain graph.
#[derive(Debug, Default, Clone)]
pub struct DomainStore {
    objects: SlotMap<DomainKey, DomainObject>,
}

impl DomainStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh, empty environment and return its key.
    pub fn create_environment(&mut self) -> DomainKey {
        self.objects
            .insert(DomainObject::Environment(Environment::default()))
    }

    // -------------------------------------------------------------------------
    // Read access
    // -------------------------------------------------------------------------

    pub fn get(&self, key: DomainKey) -> Option<&DomainObject> {
        self.objects.get(key)
    }

    /// All objects in the store, in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (DomainKey, &DomainObject)> {
        self.objects.iter()
    }

    pub fn contains(&self, key: DomainKey) -> bool {
        self.objects.contains_key(key)
    }

    pub fn environment(&self, key: DomainKey) -> Option<&Environment> {
        match self.objects.get(key)? {
            DomainObject::Environment(env) => Some(env),
            _ => None,
        }
    }

    pub fn shell(&self, key: DomainKey) -> Option<&Shell> {
        match self.objects.get(key)? {
            DomainObject::Shell(shell) => Some(shell),
            _ => None,
        }
    }

    pub fn submodel_ref(&self, key: DomainKey) -> Option<&SubmodelRef> {
        match self.objects.get(key)? {
            DomainObject::SubmodelRef(r) => Some(r),
            _ => None,
        }
    }

    pub fn submodel(&self, key: DomainKey) -> Option<&Submodel> {
        match self.objects.get(key)? {
            DomainObject::Submodel(sm) => Some(sm),
            _ => None,
        }
    }

    pub fn concept_description(&self, key: DomainKey) -> Option<&ConceptDescription> {
        match self.objects.get(key)? {
            DomainObject::ConceptDescription(cd) => Some(cd),
            _ => None,
        }
    }

    pub fn supplementary_file(&self, key: DomainKey) -> Option<&SupplementaryFile> {
        match self.objects.get(key)? {
            DomainObject::SupplementaryFile(f) => Some(f),
            _ => None,
        }
    }

    pub fn element(&self, key: DomainKey) -> Option<&Element> {
        match self.objects.get(key)? {
            DomainObject::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Ordered children of any container object, flattened.
    ///
    /// Operation variables come out grouped by direction: inputs, then
    /// outputs, then in/out.
    pub fn children_of(&self, key: DomainKey) -> Vec<DomainKey> {
        match self.objects.get(key) {
            Some(DomainObject::Shell(shell)) => shell.submodel_refs.clone(),
            Some(DomainObject::Submodel(sm)) => sm.elements.clone(),
            Some(DomainObject::Element(el)) => match &el.body {
                ElementBody::Property { .. } => Vec::new(),
                ElementBody::Collection { children } => children.clone(),
                ElementBody::ElementList { items } => items.clone(),
                ElementBody::Entity { statements } => statements.clone(),
                ElementBody::Operation {
                    inputs,
                    outputs,
                    inouts,
                } => {
                    let mut all = inputs.clone();
                    all.extend_from_slice(outputs);
                    all.extend_from_slice(inouts);
                    all
                }
                ElementBody::Relationship { annotations } => annotations.clone(),
            },
            _ => Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Mutation helpers (the mutation-collaborator role)
    // -------------------------------------------------------------------------

    /// Add a shell to an environment.
    pub fn add_shell(
        &mut self,
        env: DomainKey,
        id_short: impl Into<String>,
        id: impl Into<String>,
    ) -> Option<DomainKey> {
        let len = self.environment(env)?.shells.len();
        self.insert_shell_at(env, len, id_short, id)
    }

    /// Insert a shell into an environment at the given index.
    pub fn insert_shell_at(
        &mut self,
        env: DomainKey,
        index: usize,
        id_short: impl Into<String>,
        id: impl Into<String>,
    ) -> Option<DomainKey> {
        if index > self.environment(env)?.shells.len() {
            return None;
        }
        let key = self.objects.insert(DomainObject::Shell(Shell {
            parent: Some(env),
            id_short: id_short.into(),
            id: id.into(),
            submodel_refs: Vec::new(),
        }));
        self.environment_mut(env)?.shells.insert(index, key);
        Some(key)
    }

    /// Add a submodel to an environment (without referencing it anywhere).
    pub fn add_submodel(
        &mut self,
        env: DomainKey,
        id_short: impl Into<String>,
        id: impl Into<String>,
    ) -> Option<DomainKey> {
        self.environment(env)?;
        let key = self.objects.insert(DomainObject::Submodel(Submodel {
            parent: Some(env),
            id_short: Some(id_short.into()),
            id: id.into(),
            elements: Vec::new(),
        }));
        self.environment_mut(env)?.submodels.push(key);
        Some(key)
    }

    /// Add a reference to `target` under a shell.
    pub fn add_submodel_ref(&mut self, shell: DomainKey, target: DomainKey) -> Option<DomainKey> {
        self.shell(shell)?;
        self.submodel(target)?;
        let key = self.objects.insert(DomainObject::SubmodelRef(SubmodelRef {
            parent: Some(shell),
            target,
        }));
        self.shell_mut(shell)?.submodel_refs.push(key);
        Some(key)
    }

    /// Add a submodel to the environment and a reference to it under a shell.
    ///
    /// Returns `(submodel key, reference key)`.
    pub fn add_submodel_with_ref(
        &mut self,
        env: DomainKey,
        shell: DomainKey,
        id_short: impl Into<String>,
        id: impl Into<String>,
    ) -> Option<(DomainKey, DomainKey)> {
        let sm = self.add_submodel(env, id_short, id)?;
        let r = self.add_submodel_ref(shell, sm)?;
        Some((sm, r))
    }

    /// Remove a shell (and its submodel references) from its environment.
    /// Referenced submodels stay in the environment.
    pub fn remove_shell(&mut self, key: DomainKey) -> bool {
        let Some(shell) = self.shell(key) else {
            return false;
        };
        let parent = shell.parent;
        if let Some(env) = parent.and_then(|p| self.environment_mut(p)) {
            env.shells.retain(|&k| k != key);
        }
        self.remove_subtree(key)
    }

    /// Remove a submodel (and its element subtree) from its environment.
    ///
    /// References to it are left in place and dangle; versioned keys make the
    /// dangling detectable.
    pub fn remove_submodel(&mut self, key: DomainKey) -> bool {
        let Some(sm) = self.submodel(key) else {
            return false;
        };
        let parent = sm.parent;
        if let Some(env) = parent.and_then(|p| self.environment_mut(p)) {
            env.submodels.retain(|&k| k != key);
        }
        self.remove_subtree(key)
    }

    /// Remove a submodel reference from its shell. The submodel itself stays.
    pub fn remove_submodel_ref(&mut self, key: DomainKey) -> bool {
        let Some(r) = self.submodel_ref(key) else {
            return false;
        };
        let parent = r.parent;
        if let Some(shell) = parent.and_then(|p| self.shell_mut(p)) {
            shell.submodel_refs.retain(|&k| k != key);
        }
        self.objects.remove(key).is_some()
    }

    /// Add a concept description to an environment.
    pub fn add_concept_description(
        &mut self,
        env: DomainKey,
        id_short: Option<&str>,
        id: impl Into<String>,
    ) -> Option<DomainKey> {
        self.environment(env)?;
        let key = self
            .objects
            .insert(DomainObject::ConceptDescription(ConceptDescription {
                parent: Some(env),
                id_short: id_short.map(str::to_owned),
                id: id.into(),
            }));
        self.environment_mut(env)?.concept_descriptions.push(key);
        Some(key)
    }

    /// Remove a concept description from its environment.
    pub fn remove_concept_description(&mut self, key: DomainKey) -> bool {
        let Some(cd) = self.concept_description(key) else {
            return false;
        };
        let parent = cd.parent;
        if let Some(env) = parent.and_then(|p| self.environment_mut(p)) {
            env.concept_descriptions.retain(|&k| k != key);
        }
        self.objects.remove(key).is_some()
    }

    /// Add a supplementary file to an environment.
    pub fn add_supplementary_file(
        &mut self,
        env: DomainKey,
        path: impl Into<String>,
    ) -> Option<DomainKey> {
        self.environment(env)?;
        let key = self
            .objects
            .insert(DomainObject::SupplementaryFile(SupplementaryFile {
                parent: Some(env),
                path: path.into(),
            }));
        self.environment_mut(env)?.supplementary_files.push(key);
        Some(key)
    }

    /// Remove a supplementary file from its environment.
    pub fn remove_supplementary_file(&mut self, key: DomainKey) -> bool {
        let Some(file) = self.supplementary_file(key) else {
            return false;
        };
        let parent = file.parent;
        if let Some(env) = parent.and_then(|p| self.environment_mut(p)) {
            env.supplementary_files.retain(|&k| k != key);
        }
        self.objects.remove(key).is_some()
    }

    /// Append an element to a container (submodel, collection, list, entity
    /// or relationship annotation set).
    pub fn add_element(&mut self, container: DomainKey, element: Element) -> Option<DomainKey> {
        let len = self.container_len(container)?;
        self.insert_element_at(container, len, element)
    }

    /// Insert an element into a container at the given index.
    pub fn insert_element_at(
        &mut self,
        container: DomainKey,
        index: usize,
        mut element: Element,
    ) -> Option<DomainKey> {
        if index > self.container_len(container)? {
            return None;
        }
        element.parent = Some(container);
        let key = self.objects.insert(DomainObject::Element(element));
        let list = self.container_list_mut(container)?;
        list.insert(index, key);
        Some(key)
    }

    /// Append an operation variable to one of an operation's direction groups.
    pub fn add_operation_variable(
        &mut self,
        op: DomainKey,
        direction: OperationDirection,
        mut element: Element,
    ) -> Option<DomainKey> {
        match self.element(op)?.body {
            ElementBody::Operation { .. } => {}
            _ => return None,
        }
        element.parent = Some(op);
        let key = self.objects.insert(DomainObject::Element(element));
        match &mut self.element_mut(op)?.body {
            ElementBody::Operation {
                inputs,
                outputs,
                inouts,
            } => {
                match direction {
                    OperationDirection::Input => inputs.push(key),
                    OperationDirection::Output => outputs.push(key),
                    OperationDirection::InOut => inouts.push(key),
                }
                Some(key)
            }
            _ => None,
        }
    }

    /// Remove an element (and its whole subtree) from the graph.
    pub fn remove_element(&mut self, key: DomainKey) -> bool {
        let Some(el) = self.element(key) else {
            return false;
        };
        let parent = el.parent;
        if let Some(p) = parent {
            let in_plain_list = match self.container_list_mut(p) {
                Some(list) => {
                    list.retain(|&k| k != key);
                    true
                }
                None => false,
            };
            if !in_plain_list {
                if let Some(el) = self.element_mut(p) {
                    if let ElementBody::Operation {
                        inputs,
                        outputs,
                        inouts,
                    } = &mut el.body
                    {
                        inputs.retain(|&k| k != key);
                        outputs.retain(|&k| k != key);
                        inouts.retain(|&k| k != key);
                    }
                }
            }
        }
        self.remove_subtree(key)
    }

    /// Move an element to a new index within its parent container.
    pub fn move_element_to(&mut self, key: DomainKey, new_index: usize) -> bool {
        let Some(parent) = self.element(key).and_then(|e| e.parent) else {
            return false;
        };
        let Some(list) = self.container_list_mut(parent) else {
            return false;
        };
        let Some(pos) = list.iter().position(|&k| k == key) else {
            return false;
        };
        list.remove(pos);
        if new_index > list.len() {
            // Out of range after removal: restore and refuse.
            list.insert(pos, key);
            return false;
        }
        list.insert(new_index, key);
        true
    }

    /// Move a submodel reference to a new index within its shell.
    pub fn move_submodel_ref_to(&mut self, key: DomainKey, new_index: usize) -> bool {
        let Some(parent) = self.submodel_ref(key).and_then(|r| r.parent) else {
            return false;
        };
        let Some(shell) = self.shell_mut(parent) else {
            return false;
        };
        let Some(pos) = shell.submodel_refs.iter().position(|&k| k == key) else {
            return false;
        };
        shell.submodel_refs.remove(pos);
        if new_index > shell.submodel_refs.len() {
            shell.submodel_refs.insert(pos, key);
            return false;
        }
        shell.submodel_refs.insert(new_index, key);
        true
    }

    /// Overwrite a property's value.
    pub fn set_property_value(&mut self, key: DomainKey, value: impl Into<String>) -> bool {
        match self.element_mut(key).map(|e| &mut e.body) {
            Some(ElementBody::Property { value: v }) => {
                *v = value.into();
                true
            }
            _ => false,
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn environment_mut(&mut self, key: DomainKey) -> Option<&mut Environment> {
        match self.objects.get_mut(key)? {
            DomainObject::Environment(env) => Some(env),
            _ => None,
        }
    }

    fn shell_mut(&mut self, key: DomainKey) -> Option<&mut Shell> {
        match self.objects.get_mut(key)? {
            DomainObject::Shell(shell) => Some(shell),
            _ => None,
        }
    }

    fn element_mut(&mut self, key: DomainKey) -> Option<&mut Element> {
        match self.objects.get_mut(key)? {
            DomainObject::Element(el) => Some(el),
            _ => None,
        }
    }

    fn container_len(&self, container: DomainKey) -> Option<usize> {
        match self.objects.get(container)? {
            DomainObject::Submodel(sm) => Some(sm.elements.len()),
            DomainObject::Element(el) => match &el.body {
                ElementBody::Collection { children } => Some(children.len()),
                ElementBody::ElementList { items } => Some(items.len()),
                ElementBody::Entity { statements } => Some(statements.len()),
                ElementBody::Relationship { annotations } => Some(annotations.len()),
                _ => None,
            },
            _ => None,
        }
    }

    /// The plain ordered child list of a container, if it has exactly one.
    /// Operations are excluded here; their variables live in direction groups.
    fn container_list_mut(&mut self, container: DomainKey) -> Option<&mut Vec<DomainKey>> {
        match self.objects.get_mut(container)? {
            DomainObject::Submodel(sm) => Some(&mut sm.elements),
            DomainObject::Element(el) => match &mut el.body {
                ElementBody::Collection { children } => Some(children),
                ElementBody::ElementList { items } => Some(items),
                ElementBody::Entity { statements } => Some(statements),
                ElementBody::Relationship { annotations } => Some(annotations),
                _ => None,
            },
            _ => None,
        }
    }

    fn remove_subtree(&mut self, key: DomainKey) -> bool {
        let children = self.children_of(key);
        for child in children {
            self.remove_subtree(child);
        }
        self.objects.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_store() -> (DomainStore, DomainKey, DomainKey, DomainKey) {
        let mut store = DomainStore::new();
        let env = store.create_environment();
        let shell = store.add_shell(env, "Machine", "urn:shell:1").unwrap();
        let (sm, _r) = store
            .add_submodel_with_ref(env, shell, "Sensors", "urn:sm:1")
            .unwrap();
        (store, env, shell, sm)
    }

    #[test]
    fn test_parent_back_references() {
        let (mut store, env, shell, sm) = small_store();
        let prop = store
            .add_element(sm, Element::property("Temperature", "21"))
            .unwrap();

        assert_eq!(store.get(shell).unwrap().parent(), Some(env));
        assert_eq!(store.get(sm).unwrap().parent(), Some(env));
        assert_eq!(store.get(prop).unwrap().parent(), Some(sm));

        let r = store.shell(shell).unwrap().submodel_refs()[0];
        assert_eq!(store.get(r).unwrap().parent(), Some(shell));
        assert_eq!(store.submodel_ref(r).unwrap().target(), sm);
    }

    #[test]
    fn test_insert_and_move_within_container() {
        let (mut store, _env, _shell, sm) = small_store();
        let a = store.add_element(sm, Element::property("A", "1")).unwrap();
        let b = store.add_element(sm, Element::property("B", "2")).unwrap();
        let c = store
            .insert_element_at(sm, 0, Element::property("C", "3"))
            .unwrap();

        assert_eq!(store.submodel(sm).unwrap().elements(), &[c, a, b]);

        assert!(store.move_element_to(b, 0));
        assert_eq!(store.submodel(sm).unwrap().elements(), &[b, c, a]);

        // Out of range: list is untouched.
        assert!(!store.move_element_to(b, 7));
        assert_eq!(store.submodel(sm).unwrap().elements(), &[b, c, a]);
    }

    #[test]
    fn test_insert_shell_at_index() {
        let (mut store, env, shell, _sm) = small_store();
        let press = store.insert_shell_at(env, 0, "Press", "urn:shell:0").unwrap();

        assert_eq!(store.environment(env).unwrap().shells(), &[press, shell]);
        // Out of range: nothing is inserted.
        assert!(store.insert_shell_at(env, 7, "X", "urn:shell:x").is_none());
        assert_eq!(store.environment(env).unwrap().shells(), &[press, shell]);
    }

    #[test]
    fn test_move_submodel_ref_within_shell() {
        let (mut store, env, shell, _sm) = small_store();
        for i in 2..5 {
            store
                .add_submodel_with_ref(env, shell, format!("S{i}"), format!("urn:sm:{i}"))
                .unwrap();
        }
        let refs = store.shell(shell).unwrap().submodel_refs().to_vec();
        assert_eq!(refs.len(), 4);

        assert!(store.move_submodel_ref_to(refs[2], 0));
        assert_eq!(
            store.shell(shell).unwrap().submodel_refs(),
            &[refs[2], refs[0], refs[1], refs[3]]
        );

        assert!(!store.move_submodel_ref_to(refs[2], 9));
        assert_eq!(
            store.shell(shell).unwrap().submodel_refs(),
            &[refs[2], refs[0], refs[1], refs[3]]
        );
    }

    #[test]
    fn test_remove_element_removes_subtree() {
        let (mut store, _env, _shell, sm) = small_store();
        let coll = store.add_element(sm, Element::collection("Group")).unwrap();
        let inner = store
            .add_element(coll, Element::property("Inner", "x"))
            .unwrap();

        assert!(store.remove_element(coll));
        assert!(!store.contains(coll));
        assert!(!store.contains(inner));
        assert!(store.submodel(sm).unwrap().elements().is_empty());
    }

    #[test]
    fn test_operation_variable_groups() {
        let (mut store, _env, _shell, sm) = small_store();
        let op = store.add_element(sm, Element::operation("Calibrate")).unwrap();
        let i = store
            .add_operation_variable(op, OperationDirection::Input, Element::property("Target", ""))
            .unwrap();
        let o = store
            .add_operation_variable(op, OperationDirection::Output, Element::property("Ok", ""))
            .unwrap();

        assert_eq!(store.children_of(op), vec![i, o]);
        assert!(store.remove_element(i));
        assert_eq!(store.children_of(op), vec![o]);
    }

    #[test]
    fn test_property_value_update() {
        let (mut store, _env, _shell, sm) = small_store();
        let prop = store
            .add_element(sm, Element::property("Pressure", "5"))
            .unwrap();

        assert!(store.set_property_value(prop, "6"));
        match store.element(prop).unwrap().body() {
            ElementBody::Property { value } => assert_eq!(value, "6"),
            _ => panic!("expected property"),
        }
        assert!(!store.set_property_value(sm, "nope"));
    }

    #[test]
    fn test_concept_descriptions_and_files() {
        let (mut store, env, _shell, _sm) = small_store();
        let cd = store
            .add_concept_description(env, Some("TempConcept"), "urn:cd:1")
            .unwrap();
        let file = store.add_supplementary_file(env, "/docs/manual.pdf").unwrap();

        assert_eq!(store.environment(env).unwrap().concept_descriptions(), &[cd]);
        assert_eq!(store.environment(env).unwrap().supplementary_files(), &[file]);

        assert!(store.remove_concept_description(cd));
        assert!(store.environment(env).unwrap().concept_descriptions().is_empty());
        assert!(!store.contains(cd));
    }
}
