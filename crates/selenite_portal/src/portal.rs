use glam::{Vec2, Vec3};
use tracing::debug;

use selenite_math::frame::{through_portal, Frame};
use selenite_math::frustum::Aabb;
use selenite_math::plane::{offset_side, Plane};
use selenite_math::projection::Lens;

use crate::camera::Camera;
use crate::config::{PortalSettings, SetupError};
use crate::traveller::{PortalTraveller, TravellerId, Travellers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortalId(pub usize);

/// The renderable viewport quad. `thickness` and `local_offset` are written
/// by the collision guard each update so the quad cannot be clipped by the
/// player camera's near plane mid-crossing; `shadow_only` is toggled by the
/// render orchestrator while the virtual camera looks through the opening.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Screen {
    pub half_extents: Vec2,
    pub thickness: f32,
    pub local_offset: f32,
    pub shadow_only: bool,
}

impl Screen {
    pub fn new(half_extents: Vec2) -> Self {
        Self {
            half_extents,
            thickness: 0.0,
            local_offset: 0.0,
            shadow_only: false,
        }
    }
}

pub struct Portal {
    pub frame: Frame,
    pub screen: Screen,
    pub(crate) linked: Option<PortalId>,
    pub(crate) tracked: Vec<TravellerId>,
    pub(crate) view_camera: Camera,
    pub(crate) view_target_size: Option<(u32, u32)>,
}

impl Portal {
    fn new(frame: Frame, screen_half_extents: Vec2) -> Self {
        Self {
            frame,
            screen: Screen::new(screen_half_extents),
            linked: None,
            tracked: Vec::new(),
            view_camera: Camera::new(Frame::IDENTITY, Lens::default()),
            view_target_size: None,
        }
    }

    pub fn linked(&self) -> Option<PortalId> {
        self.linked
    }

    /// Currently tracked travellers in entry order.
    pub fn tracked(&self) -> &[TravellerId] {
        &self.tracked
    }

    pub fn plane(&self) -> Plane {
        Plane::new(self.frame.position, self.frame.forward())
    }

    /// World bounds of the screen quad including its collision-guard
    /// thickness; the frustum test input for the render early-out.
    pub fn screen_bounds(&self) -> Aabb {
        let hx = self.screen.half_extents.x;
        let hy = self.screen.half_extents.y;
        let z0 = self.screen.local_offset - self.screen.thickness * 0.5;
        let z1 = self.screen.local_offset + self.screen.thickness * 0.5;
        let matrix = self.frame.local_to_world();
        let corners = [
            Vec3::new(-hx, -hy, z0),
            Vec3::new(hx, -hy, z0),
            Vec3::new(-hx, hy, z0),
            Vec3::new(hx, hy, z0),
            Vec3::new(-hx, -hy, z1),
            Vec3::new(hx, -hy, z1),
            Vec3::new(-hx, hy, z1),
            Vec3::new(hx, hy, z1),
        ];
        Aabb::from_points(corners.into_iter().map(|c| matrix.transform_point3(c)))
    }
}

/// Owns the portals and the traveller registry; portals and travellers refer
/// to each other by id only.
///
/// Frame protocol (host-driven): call [`PortalSystem::update_portal`] for
/// *every* portal, then [`PortalSystem::render_portal`] for the visible
/// ones. Rendering reads slice parameters and visibility state that the
/// update phase writes, so no portal may render before all portals have
/// updated.
pub struct PortalSystem {
    pub(crate) portals: Vec<Portal>,
    pub travellers: Travellers,
    pub(crate) settings: PortalSettings,
}

impl PortalSystem {
    pub fn new(settings: PortalSettings) -> Self {
        Self {
            portals: Vec::new(),
            travellers: Travellers::default(),
            settings: settings.sanitize(),
        }
    }

    pub fn settings(&self) -> &PortalSettings {
        &self.settings
    }

    pub fn add_portal(&mut self, frame: Frame, screen_half_extents: Vec2) -> PortalId {
        let id = PortalId(self.portals.len());
        self.portals.push(Portal::new(frame, screen_half_extents));
        id
    }

    /// Links both directions at once, so a linked pair is symmetric by
    /// construction. Re-linking a portal overwrites its previous link; the
    /// abandoned portal is caught by [`PortalSystem::validate`].
    pub fn link(&mut self, a: PortalId, b: PortalId) {
        self.portals[a.0].linked = Some(b);
        self.portals[b.0].linked = Some(a);
    }

    pub fn portal(&self, id: PortalId) -> &Portal {
        &self.portals[id.0]
    }

    pub fn portal_mut(&mut self, id: PortalId) -> &mut Portal {
        &mut self.portals[id.0]
    }

    pub fn portal_count(&self) -> usize {
        self.portals.len()
    }

    /// Setup-time validation; run once after scene assembly, never per
    /// frame.
    pub fn validate(&self) -> Result<(), SetupError> {
        for (index, portal) in self.portals.iter().enumerate() {
            let id = PortalId(index);
            let Some(linked) = portal.linked else {
                return Err(SetupError::MissingLinkedPortal(id));
            };
            if self.portals[linked.0].linked != Some(id) {
                return Err(SetupError::AsymmetricLink { portal: id, linked });
            }
        }
        for (id, traveller) in self.travellers.iter() {
            let state = traveller.state();
            if state.materials.len() != state.clone_materials.len() {
                return Err(SetupError::MaterialCountMismatch {
                    traveller: Some(id),
                    originals: state.materials.len(),
                    clones: state.clone_materials.len(),
                });
            }
        }
        Ok(())
    }

    /// Fails fast when the original and clone material lists disagree; the
    /// slice update writes both lists slot-for-slot.
    pub fn register_traveller(
        &mut self,
        traveller: Box<dyn PortalTraveller>,
    ) -> Result<TravellerId, SetupError> {
        let state = traveller.state();
        if state.materials.len() != state.clone_materials.len() {
            // No id yet; nothing was allocated for the rejected traveller.
            return Err(SetupError::MaterialCountMismatch {
                traveller: None,
                originals: state.materials.len(),
                clones: state.clone_materials.len(),
            });
        }
        Ok(self.travellers.insert(traveller))
    }

    pub fn unregister_traveller(&mut self, id: TravellerId) {
        for portal in &mut self.portals {
            portal.tracked.retain(|&tracked| tracked != id);
        }
        self.travellers.remove(id);
    }

    /// Update phase for every portal, in portal order. All updates must
    /// complete before any render this frame.
    pub fn update_all(&mut self, player_camera: &Camera) {
        for index in 0..self.portals.len() {
            self.update_portal(PortalId(index), player_camera);
        }
    }

    /// Crossing detection and teleportation for one portal's tracked
    /// travellers, then the screen collision guard. A portal with no link
    /// performs no crossing detection.
    pub fn update_portal(&mut self, id: PortalId, player_camera: &Camera) {
        let Some(linked_id) = self.portals[id.0].linked else {
            return;
        };
        let this_frame = self.portals[id.0].frame;
        let linked_frame = self.portals[linked_id.0].frame;
        let forward = this_frame.forward();

        let mut has_teleported = false;
        let mut index = 0;
        while index < self.portals[id.0].tracked.len() {
            let traveller_id = self.portals[id.0].tracked[index];
            let Some(traveller) = self.travellers.get_mut(traveller_id) else {
                // Unregistered while tracked; forget the handle.
                self.portals[id.0].tracked.remove(index);
                continue;
            };

            let (through, offset_from_portal, side, side_old, old_frame) = {
                let state = traveller.state();
                let through = through_portal(&this_frame, &linked_frame, &state.frame);
                let offset = state.frame.position - this_frame.position;
                (
                    through,
                    offset,
                    offset_side(offset, forward),
                    offset_side(state.previous_offset_from_portal, forward),
                    state.frame,
                )
            };

            if side != side_old {
                // Crossed since the last update: re-anchor the traveller and
                // leave the clone at the old pose so nothing pops visually.
                traveller.teleport(&this_frame, &linked_frame, through);
                traveller.state_mut().clone_frame = old_frame;
                has_teleported = true;

                self.portals[id.0].tracked.remove(index);
                // Trigger timing is not reliable for the handoff; tell the
                // linked portal now rather than waiting for its own
                // trigger-enter event.
                self.on_traveller_enter(linked_id, traveller_id, player_camera);
                if self.settings.log_debug_messages {
                    debug!(
                        portal = id.0,
                        traveller = traveller_id.0,
                        "traveller teleported to linked portal"
                    );
                }
            } else {
                traveller.state_mut().clone_frame = through;
                self.update_slice_params(id, traveller_id, player_camera);
                if let Some(traveller) = self.travellers.get_mut(traveller_id) {
                    traveller.state_mut().previous_offset_from_portal = offset_from_portal;
                }
                index += 1;
            }
        }

        // A teleport changes which side of each portal the player camera is
        // on for slicing purposes; refresh everything on both portals to
        // avoid a one-frame pop. Only the player's own teleport strictly
        // needs this, but narrowing it is not worth the artifact.
        if has_teleported {
            let tracked = self.portals[id.0].tracked.clone();
            for traveller_id in tracked {
                self.update_slice_params(id, traveller_id, player_camera);
            }
            let linked_tracked = self.portals[linked_id.0].tracked.clone();
            for traveller_id in linked_tracked {
                self.update_slice_params(linked_id, traveller_id, player_camera);
            }
        }

        self.protect_screen_from_clipping(id, player_camera);
    }

    /// Collision collaborator callback: a traveller-capable object entered
    /// this portal's trigger volume. Idempotent, so the physics layer's own
    /// enter event after a teleport handoff is harmless.
    pub fn on_trigger_enter(
        &mut self,
        id: PortalId,
        traveller_id: TravellerId,
        player_camera: &Camera,
    ) {
        self.on_traveller_enter(id, traveller_id, player_camera);
    }

    /// Collision collaborator callback: the object left the trigger volume.
    pub fn on_trigger_exit(&mut self, id: PortalId, traveller_id: TravellerId) {
        let Some(index) = self.portals[id.0]
            .tracked
            .iter()
            .position(|&tracked| tracked == traveller_id)
        else {
            return;
        };
        if let Some(traveller) = self.travellers.get_mut(traveller_id) {
            traveller.exit_portal_threshold();
        }
        self.portals[id.0].tracked.remove(index);
    }

    fn on_traveller_enter(
        &mut self,
        id: PortalId,
        traveller_id: TravellerId,
        player_camera: &Camera,
    ) {
        if self.portals[id.0].tracked.contains(&traveller_id) {
            return;
        }
        let portal_position = self.portals[id.0].frame.position;

        let Some(traveller) = self.travellers.get_mut(traveller_id) else {
            return;
        };
        traveller.enter_portal_threshold();

        self.update_slice_params(id, traveller_id, player_camera);
        if let Some(traveller) = self.travellers.get_mut(traveller_id) {
            let state = traveller.state_mut();
            state.previous_offset_from_portal = state.frame.position - portal_position;
        }
        self.portals[id.0].tracked.push(traveller_id);
        self.protect_screen_from_clipping(id, player_camera);
    }

    /// Writes the slice plane and offset for one traveller into every
    /// material slot on both the primary and the clone. Pure function of
    /// the current portal, traveller and player-camera poses, so calling it
    /// twice in a frame yields identical output.
    pub fn update_slice_params(
        &mut self,
        id: PortalId,
        traveller_id: TravellerId,
        player_camera: &Camera,
    ) {
        let Some(linked_id) = self.portals[id.0].linked else {
            return;
        };
        let this_frame = self.portals[id.0].frame;
        let linked_frame = self.portals[linked_id.0].frame;
        let screen_thickness = self.portals[id.0].screen.thickness;
        let this_plane = Plane::new(this_frame.position, this_frame.forward());
        let linked_plane = Plane::new(linked_frame.position, linked_frame.forward());

        let Some(traveller) = self.travellers.get_mut(traveller_id) else {
            return;
        };
        let state = traveller.state_mut();

        let side = this_plane.side_of(state.frame.position);
        let slice_normal = this_frame.forward() * -(side as f32);
        let clone_slice_normal = linked_frame.forward() * side as f32;
        let slice_centre = this_frame.position;
        let clone_slice_centre = linked_frame.position;

        // The offset pushes the cut past the screen's guard thickness, but
        // only when the player views the sliced face from the far side.
        let mut centre_offset_multiplier = 0.0;
        let mut clone_centre_offset_multiplier = 0.0;
        let player_same_side_as_traveller =
            this_plane.same_side(player_camera.frame.position, state.frame.position);
        if !player_same_side_as_traveller {
            centre_offset_multiplier = 1.0;
        }
        let player_same_side_as_clone =
            side != linked_plane.side_of(player_camera.frame.position);
        if !player_same_side_as_clone {
            clone_centre_offset_multiplier = 1.0;
        }

        state.centre_offset_multiplier = centre_offset_multiplier;
        state.clone_centre_offset_multiplier = clone_centre_offset_multiplier;
        for params in &mut state.materials {
            params.slice_centre = slice_centre;
            params.slice_normal = slice_normal;
            params.centre_offset_amount = -screen_thickness;
            params.centre_offset_multiplier = centre_offset_multiplier;
        }
        for params in &mut state.clone_materials {
            params.slice_centre = clone_slice_centre;
            params.slice_normal = clone_slice_normal;
            params.centre_offset_amount = -screen_thickness;
            params.centre_offset_multiplier = clone_centre_offset_multiplier;
        }
    }

    /// Thickens and shifts the screen quad so the player camera's near
    /// plane cannot cut through it while crossing. The thickness feeds the
    /// slice offset amount above.
    pub fn protect_screen_from_clipping(&mut self, id: PortalId, player_camera: &Camera) {
        let lens = player_camera.lens;
        let half_height = lens.near * (lens.fov_y * 0.5).tan();
        let half_width = half_height * lens.aspect;
        let corner_distance = Vec3::new(half_width, half_height, lens.near).length();

        let portal = &mut self.portals[id.0];
        let camera_facing_same_dir = portal
            .frame
            .forward()
            .dot(portal.frame.position - player_camera.frame.position)
            > 0.0;
        portal.screen.thickness = corner_distance;
        portal.screen.local_offset =
            corner_distance * if camera_facing_same_dir { 0.5 } else { -0.5 };
    }
}
