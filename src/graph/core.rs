use super::id::InstanceId;
use super::instance::{RszInstance, RszValue, UserData, UNASSIGNED_INDEX};
use crate::codec;
use crate::format::{path_hash, InstanceInfo, UserDataInfo};
use crate::options::RszOptions;
use crate::schema::SchemaRegistry;
use crate::{RszError, Result};

/// An object graph: the instance arena plus the tables stored in an RSZ block.
///
/// The arena owns every instance ever created in this graph and hands out
/// stable [`InstanceId`] handles. On top of it sit:
///
/// * the **instance list**, the ordered subset that is written to disk (its
///   positions are the instances' `index`, slot 0 is always the NULL sentinel);
/// * the **object list** / **object table**, the externally addressable roots
///   (handles and their list indices, kept in lockstep);
/// * the descriptor and userdata tables regenerated by
///   [`RszGraph::rebuild_instance_info`].
///
/// Instances dropped from the instance list stay in the arena until the graph
/// itself is dropped, so reference cycles never leak or dangle.
#[derive(Debug, Clone)]
pub struct RszGraph {
    registry: SchemaRegistry,
    options: RszOptions,
    pub(crate) version: u32,
    pub(crate) nodes: Vec<RszInstance>,
    pub(crate) instance_list: Vec<InstanceId>,
    pub(crate) object_list: Vec<InstanceId>,
    pub(crate) object_table: Vec<i32>,
    pub(crate) instance_infos: Vec<InstanceInfo>,
    pub(crate) userdata_infos: Vec<UserDataInfo>,
}

impl RszGraph {
    /// Creates an empty graph holding only the NULL sentinel.
    pub fn new(registry: &SchemaRegistry, options: RszOptions) -> Self {
        let mut null = RszInstance::new(registry.null_class(), Vec::new());
        null.index = 0;
        Self {
            registry: registry.clone(),
            options,
            version: options.version,
            nodes: vec![null],
            instance_list: vec![InstanceId::NULL],
            object_list: Vec::new(),
            object_table: Vec::new(),
            instance_infos: vec![InstanceInfo { type_id: 0, crc: 0 }],
            userdata_infos: Vec::new(),
        }
    }

    /// The registry this graph decodes against.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Options used to read (or create) this graph.
    pub fn options(&self) -> RszOptions {
        self.options
    }

    /// Header version written by [`RszGraph::write`].
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Changes the header version used on write.
    pub fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    /// Handle of the NULL sentinel.
    pub fn null_id(&self) -> InstanceId {
        InstanceId::NULL
    }

    /// Borrows an instance.
    pub fn get(&self, id: InstanceId) -> Result<&RszInstance> {
        self.nodes
            .get(id.slot())
            .ok_or_else(|| RszError::Internal(format!("instance {id} is not in this graph")))
    }

    /// Mutably borrows an instance.
    pub fn get_mut(&mut self, id: InstanceId) -> Result<&mut RszInstance> {
        self.nodes
            .get_mut(id.slot())
            .ok_or_else(|| RszError::Internal(format!("instance {id} is not in this graph")))
    }

    /// Number of instances in the arena, whether listed or not.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    /// The instance list, in file order. Slot 0 is the NULL sentinel.
    pub fn instances(&self) -> &[InstanceId] {
        &self.instance_list
    }

    /// Handle of the instance at list position `index`.
    pub fn instance_at(&self, index: usize) -> Option<InstanceId> {
        self.instance_list.get(index).copied()
    }

    /// The externally addressable roots, in object table order.
    pub fn object_list(&self) -> &[InstanceId] {
        &self.object_list
    }

    /// The object table: list index of every object-list entry.
    pub fn object_table(&self) -> &[i32] {
        &self.object_table
    }

    /// Instance descriptors, one per listed instance.
    pub fn instance_infos(&self) -> &[InstanceInfo] {
        &self.instance_infos
    }

    /// Userdata records, ordered by instance index.
    pub fn userdata_infos(&self) -> &[UserDataInfo] {
        &self.userdata_infos
    }

    /// Moves an instance into the arena and returns its handle. The instance
    /// is not listed.
    pub(crate) fn alloc(&mut self, instance: RszInstance) -> Result<InstanceId> {
        let slot = u32::try_from(self.nodes.len())
            .map_err(|_| RszError::Internal("instance arena overflow".into()))?;
        self.nodes.push(instance);
        Ok(InstanceId::new(slot))
    }

    /// Returns true if `id` currently sits at its recorded list position.
    pub fn is_listed(&self, id: InstanceId) -> bool {
        self.get(id)
            .ok()
            .and_then(|node| usize::try_from(node.index).ok())
            .is_some_and(|index| self.instance_list.get(index) == Some(&id))
    }

    /// Creates an instance of `class_name` with default field values.
    ///
    /// Reference fields point at the NULL sentinel, arrays are empty and struct
    /// fields hold default inline instances. The instance is not listed until it
    /// is inserted or added to the object table.
    pub fn create_instance(&mut self, class_name: &str) -> Result<InstanceId> {
        let class = self.registry.require_class(class_name)?;
        let values = codec::default_values(&class, &self.registry)?;
        self.alloc(RszInstance::new(class, values))
    }

    /// Builds a default inline struct value of `class_name`, for struct fields
    /// and struct arrays. Struct values live inside their owner, not in the arena.
    pub fn create_struct(&self, class_name: &str) -> Result<RszValue> {
        let class = self.registry.require_class(class_name)?;
        let values = codec::default_values(&class, &self.registry)?;
        Ok(RszValue::Struct(Box::new(RszInstance::new_struct(class, values))))
    }

    /// Creates a userdata instance whose payload lives at an external path.
    pub fn create_user_data(&mut self, class_name: &str, path: impl Into<String>) -> Result<InstanceId> {
        let class = self.registry.require_class(class_name)?;
        let user_data = UserData::External { path: path.into() };
        self.alloc(RszInstance::new_user_data(class, user_data))
    }

    /// Creates a userdata instance embedding a complete nested graph.
    pub fn create_embedded_user_data(&mut self, class_name: &str, graph: RszGraph) -> Result<InstanceId> {
        let class = self.registry.require_class(class_name)?;
        let user_data = UserData::Embedded {
            path_hash: path_hash(&class.name),
            graph: Box::new(graph),
        };
        self.alloc(RszInstance::new_user_data(class, user_data))
    }

    /// Appends `id` to the instance list, preceded by every instance it
    /// references that is not listed yet (children first). Returns its index.
    pub fn insert_instance(&mut self, id: InstanceId) -> Result<i32> {
        if self.is_listed(id) {
            return Ok(self.get(id)?.index);
        }
        for child in self.flatten(&[id])? {
            if child == InstanceId::NULL || self.is_listed(child) {
                continue;
            }
            let index = i32::try_from(self.instance_list.len())
                .map_err(|_| RszError::Internal("instance list overflow".into()))?;
            self.get_mut(child)?.index = index;
            self.instance_list.push(child);
        }
        Ok(self.get(id)?.index)
    }

    /// Inserts several instances in order.
    pub fn insert_instances(&mut self, ids: &[InstanceId]) -> Result<()> {
        for id in ids {
            self.insert_instance(*id)?;
        }
        Ok(())
    }

    /// Registers `id` as an externally addressable root.
    ///
    /// A no-op if the instance is already registered at its recorded position.
    /// Otherwise the instance is inserted into the instance list if absent, a new
    /// object table entry is appended and the instance is stamped with it.
    /// Returns the object table position.
    pub fn add_to_object_table(&mut self, id: InstanceId) -> Result<usize> {
        if id == InstanceId::NULL {
            return Err(RszError::Write("the NULL sentinel cannot be an object".into()));
        }
        let node = self.get(id)?;
        if let Ok(position) = usize::try_from(node.object_table_index) {
            if self.object_list.get(position) == Some(&id)
                && self.object_table.get(position) == Some(&node.index)
                && self.is_listed(id)
            {
                return Ok(position);
            }
        }
        let index = self.insert_instance(id)?;
        let position = self.object_list.len();
        self.object_list.push(id);
        self.object_table.push(index);
        self.get_mut(id)?.object_table_index = i32::try_from(position)
            .map_err(|_| RszError::Internal("object table overflow".into()))?;
        Ok(position)
    }

    /// Removes `id` from the object list and table. Returns false if it was not
    /// registered. The instance stays listed until the next list rebuild.
    pub fn remove_from_object_table(&mut self, id: InstanceId) -> Result<bool> {
        let Some(position) = self.object_list.iter().position(|o| *o == id) else {
            return Ok(false);
        };
        self.object_list.remove(position);
        self.object_table.remove(position);
        self.get_mut(id)?.object_table_index = UNASSIGNED_INDEX;
        self.restamp_object_table()?;
        Ok(true)
    }

    pub(crate) fn restamp_object_table(&mut self) -> Result<()> {
        for position in 0..self.object_list.len() {
            let id = self.object_list[position];
            self.get_mut(id)?.object_table_index = i32::try_from(position)
                .map_err(|_| RszError::Internal("object table overflow".into()))?;
        }
        Ok(())
    }
}
