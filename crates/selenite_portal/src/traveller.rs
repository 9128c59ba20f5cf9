use glam::Vec3;
use rustc_hash::FxHashMap;

use selenite_math::frame::Frame;

/// Per-material inputs of the slicing shader. The subsystem writes these
/// every frame; the host uploads them under the shader's parameter names
/// (`sliceCentre`, `sliceNormal`, `centreOffsetAmount`,
/// `centreOffsetMultiplier`).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SliceParams {
    pub slice_centre: Vec3,
    pub slice_normal: Vec3,
    pub centre_offset_amount: f32,
    pub centre_offset_multiplier: f32,
}

/// Multiplier value that fully hides a sliced mesh from the current camera.
pub const HIDDEN_MULTIPLIER: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TravellerId(pub u32);

/// Mutable per-traveller state shared between the crossing state machine and
/// the render orchestrator. The portal currently tracking the traveller is
/// the only writer of the crossing fields; the render pass only toggles the
/// visual/multiplier overrides and restores them before returning.
#[derive(Debug, Clone)]
pub struct TravellerState {
    /// World transform of the primary visual.
    pub frame: Frame,
    /// World transform of the clone visual, placed each frame at the
    /// through-portal pose (or, during a teleport, at the pre-teleport pose).
    pub clone_frame: Frame,
    pub graphics_active: bool,
    pub clone_active: bool,
    pub materials: Vec<SliceParams>,
    pub clone_materials: Vec<SliceParams>,
    /// Displacement from the tracking portal recorded at the last update;
    /// its sign against the portal forward detects side crossings.
    pub previous_offset_from_portal: Vec3,
    pub centre_offset_multiplier: f32,
    pub clone_centre_offset_multiplier: f32,
}

impl TravellerState {
    pub fn new(frame: Frame, material_count: usize) -> Self {
        Self {
            frame,
            clone_frame: frame,
            graphics_active: true,
            clone_active: false,
            materials: vec![SliceParams::default(); material_count],
            clone_materials: vec![SliceParams::default(); material_count],
            previous_offset_from_portal: Vec3::ZERO,
            centre_offset_multiplier: 0.0,
            clone_centre_offset_multiplier: 0.0,
        }
    }
}

/// Capability every trackable object provides. Concrete types override the
/// threshold hooks to drive their own effects (audio, physics handoff,
/// camera snap); the defaults implement the visual contract.
pub trait PortalTraveller {
    fn state(&self) -> &TravellerState;
    fn state_mut(&mut self) -> &mut TravellerState;

    /// The traveller starts straddling a portal: show the clone. Slice
    /// parameters are primed by the tracking portal right after this runs.
    fn enter_portal_threshold(&mut self) {
        self.state_mut().clone_active = true;
    }

    /// The traveller left the portal volume without crossing (or finished
    /// crossing): hide the clone and disable slicing on every material.
    fn exit_portal_threshold(&mut self) {
        let state = self.state_mut();
        state.clone_active = false;
        for params in &mut state.materials {
            params.slice_normal = Vec3::ZERO;
        }
        for params in &mut state.clone_materials {
            params.slice_normal = Vec3::ZERO;
        }
    }

    /// Instantaneous re-anchoring to the destination portal. `new_frame` is
    /// the through-portal composition of the pre-teleport frame; overriders
    /// can use the portal frames to rotate velocities and look angles.
    fn teleport(&mut self, _source: &Frame, _dest: &Frame, new_frame: Frame) {
        self.state_mut().frame = new_frame;
    }
}

/// Stock traveller with no behavior beyond the default visual contract.
pub struct Prop {
    state: TravellerState,
}

impl Prop {
    pub fn new(frame: Frame, material_count: usize) -> Self {
        Self {
            state: TravellerState::new(frame, material_count),
        }
    }
}

impl PortalTraveller for Prop {
    fn state(&self) -> &TravellerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TravellerState {
        &mut self.state
    }
}

/// Owning registry of travellers. Portals refer to travellers by id only,
/// so tearing down a portal never cascades into traveller cleanup.
#[derive(Default)]
pub struct Travellers {
    slots: FxHashMap<TravellerId, Box<dyn PortalTraveller>>,
    next_id: u32,
}

impl Travellers {
    pub fn insert(&mut self, traveller: Box<dyn PortalTraveller>) -> TravellerId {
        let id = TravellerId(self.next_id);
        self.next_id += 1;
        self.slots.insert(id, traveller);
        id
    }

    pub fn remove(&mut self, id: TravellerId) -> Option<Box<dyn PortalTraveller>> {
        self.slots.remove(&id)
    }

    pub fn get(&self, id: TravellerId) -> Option<&dyn PortalTraveller> {
        self.slots.get(&id).map(|traveller| traveller.as_ref())
    }

    pub fn get_mut(&mut self, id: TravellerId) -> Option<&mut Box<dyn PortalTraveller>> {
        self.slots.get_mut(&id)
    }

    pub fn contains(&self, id: TravellerId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TravellerId, &dyn PortalTraveller)> {
        self.slots
            .iter()
            .map(|(&id, traveller)| (id, traveller.as_ref()))
    }
}
