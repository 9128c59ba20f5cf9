use tracing::{debug, warn};

use glam::Vec3;

use selenite_math::frame::{through_portal, Frame};
use selenite_math::frustum::aabb_in_frustum;
use selenite_math::projection::{camera_space_clip_plane, oblique_projection};

use crate::camera::Camera;
use crate::portal::{PortalId, PortalSystem};
use crate::traveller::{TravellerId, HIDDEN_MULTIPLIER};

/// Graphics-side collaborator. The orchestrator decides *what* to draw and
/// with which camera; the backend owns textures, materials and draw calls.
pub trait RenderBackend {
    /// (Re)create `portal`'s off-screen view target at the given pixel size
    /// and bind it as the linked portal screen's display texture.
    fn recreate_view_target(&mut self, portal: PortalId, width: u32, height: u32);

    /// Render the scene from `camera` into `portal`'s view target. `scene`
    /// is the system in its per-pass state: hidden traveller visuals,
    /// overridden slice multipliers and the shadow-only screen mode are all
    /// read through it, so the draw must honor what it reports rather than
    /// any state cached from the update phase.
    fn render_view(&mut self, portal: PortalId, camera: &Camera, scene: &PortalSystem);

    /// Re-apply the linked screen's display material; a deeper pass may have
    /// swapped it for a fallback.
    fn restore_screen_material(&mut self, portal: PortalId);
}

/// A traveller visual switched off for the duration of one portal's render,
/// to be switched back on afterwards.
enum HiddenVisual {
    Primary(TravellerId),
    Clone(TravellerId),
}

impl PortalSystem {
    /// Renders every linked portal's view. Convenience over per-portal
    /// calls; returns the total number of scene renders issued.
    pub fn render_all(
        &mut self,
        player_camera: &Camera,
        display_size: (u32, u32),
        backend: &mut dyn RenderBackend,
    ) -> u32 {
        let mut total = 0;
        for index in 0..self.portals.len() {
            total += self.render_portal(PortalId(index), player_camera, display_size, backend);
        }
        total
    }

    /// Renders one portal's view texture, recursing up to the configured
    /// limit, and returns the number of scene renders issued. Must run after
    /// every portal's update this frame.
    pub fn render_portal(
        &mut self,
        id: PortalId,
        player_camera: &Camera,
        display_size: (u32, u32),
        backend: &mut dyn RenderBackend,
    ) -> u32 {
        let Some(linked_id) = self.portals[id.0].linked else {
            warn!(portal = id.0, "render skipped: portal has no link");
            return 0;
        };

        // Cheapest early-out first: if the linked screen is nowhere in the
        // player's frustum, nothing rendered here could ever be seen.
        let linked_screen_bounds = self.portals[linked_id.0].screen_bounds();
        if !aabb_in_frustum(&player_camera.frustum_planes(), &linked_screen_bounds) {
            if self.settings.log_debug_messages {
                debug!(portal = id.0, "render skipped: linked screen not visible");
            }
            return 0;
        }

        self.ensure_view_target(id, display_size, backend);

        let recursion_limit = self.settings.recursion_limit as usize;
        let this_frame = self.portals[id.0].frame;
        let linked_frame = self.portals[linked_id.0].frame;

        // Walk the virtual camera one portal bounce deeper per level. The
        // poses are stored deepest-first so the innermost view renders
        // before any screen that displays it.
        let mut poses = vec![Frame::IDENTITY; recursion_limit];
        let mut use_recursion = true;
        let mut camera_frame = player_camera.frame;
        for i in 0..recursion_limit {
            camera_frame = through_portal(&linked_frame, &this_frame, &camera_frame);
            poses[recursion_limit - i - 1] = camera_frame;

            if i == 0 {
                // If the first bounce cannot see the linked screen, no
                // deeper level can contribute pixels.
                let mut probe = Camera::new(Frame::IDENTITY, player_camera.lens);
                probe.place(camera_frame.position, camera_frame.rotation);
                use_recursion =
                    aabb_in_frustum(&probe.frustum_planes(), &linked_screen_bounds);
            }
        }

        // The screen must not occlude the opening it represents while the
        // virtual camera looks through it.
        self.portals[id.0].screen.shadow_only = true;
        let first_bounce_position = poses[recursion_limit - 1].position;
        let hidden = self.hide_travellers(id, linked_id, first_bounce_position);

        let start_index = if use_recursion { 0 } else { recursion_limit - 1 };
        let mut render_count = 0;
        for pose in &poses[start_index..] {
            {
                let portal = &mut self.portals[id.0];
                portal.view_camera.lens = player_camera.lens;
                portal.view_camera.place(pose.position, pose.rotation);
            }
            self.set_near_clip_plane(id);
            backend.render_view(id, &self.portals[id.0].view_camera, &*self);
            backend.restore_screen_material(id);
            render_count += 1;
        }

        self.portals[id.0].screen.shadow_only = false;
        self.restore_hidden(hidden);
        self.restore_slice_multipliers(id, linked_id);

        if self.settings.log_debug_messages {
            debug!(portal = id.0, render_count, "portal view rendered");
        }
        render_count
    }

    fn ensure_view_target(
        &mut self,
        id: PortalId,
        display_size: (u32, u32),
        backend: &mut dyn RenderBackend,
    ) {
        let portal = &mut self.portals[id.0];
        if portal.view_target_size != Some(display_size) {
            portal.view_target_size = Some(display_size);
            backend.recreate_view_target(id, display_size.0, display_size.1);
        }
    }

    /// Repoints the view camera's near plane at this portal's surface so
    /// geometry between the virtual camera and the portal is clipped away.
    /// Falls back to the physical near plane when the camera sits too close
    /// to the surface for a stable oblique matrix.
    fn set_near_clip_plane(&mut self, id: PortalId) {
        let plane = self.portals[id.0].plane();
        let near_clip_offset = self.settings.near_clip_offset;
        let near_clip_limit = self.settings.near_clip_limit;

        let portal = &mut self.portals[id.0];
        let clip = camera_space_clip_plane(
            portal.view_camera.view_matrix(),
            portal.view_camera.frame.position,
            &plane,
            near_clip_offset,
        );
        if clip.w.abs() > near_clip_limit {
            let projection = oblique_projection(&portal.view_camera.lens, clip);
            portal.view_camera.set_projection_override(Some(projection));
        } else {
            portal.view_camera.set_projection_override(None);
        }
    }

    /// A traveller mid-crossing straddles the portal plane, so the oblique
    /// clip alone cannot keep it from appearing twice in the view. Visuals
    /// on the camera's side are switched off outright; the rest are hidden
    /// by forcing their slice offset to swallow the whole mesh.
    fn hide_travellers(
        &mut self,
        id: PortalId,
        linked_id: PortalId,
        view_camera_position: Vec3,
    ) -> Vec<HiddenVisual> {
        let this_plane = self.portals[id.0].plane();
        let linked_plane = self.portals[linked_id.0].plane();
        let mut hidden = Vec::new();

        for &traveller_id in &self.portals[id.0].tracked {
            let Some(traveller) = self.travellers.get_mut(traveller_id) else {
                continue;
            };
            let state = traveller.state_mut();
            if !state.graphics_active {
                continue;
            }
            if this_plane.same_side(state.frame.position, view_camera_position) {
                state.graphics_active = false;
                hidden.push(HiddenVisual::Primary(traveller_id));
            } else {
                for params in &mut state.materials {
                    params.centre_offset_multiplier = HIDDEN_MULTIPLIER;
                }
                for params in &mut state.clone_materials {
                    params.centre_offset_multiplier = HIDDEN_MULTIPLIER;
                }
            }
        }

        for &traveller_id in &self.portals[linked_id.0].tracked {
            let Some(traveller) = self.travellers.get_mut(traveller_id) else {
                continue;
            };
            let state = traveller.state_mut();
            if !state.clone_active {
                continue;
            }
            let camera_same_side_as_clone =
                this_plane.side_of(view_camera_position) == linked_plane.side_of(state.frame.position);
            if !camera_same_side_as_clone {
                state.clone_active = false;
                hidden.push(HiddenVisual::Clone(traveller_id));
            } else {
                for params in &mut state.materials {
                    params.centre_offset_multiplier = HIDDEN_MULTIPLIER;
                }
                for params in &mut state.clone_materials {
                    params.centre_offset_multiplier = HIDDEN_MULTIPLIER;
                }
            }
        }

        hidden
    }

    fn restore_hidden(&mut self, hidden: Vec<HiddenVisual>) {
        for visual in hidden {
            match visual {
                HiddenVisual::Primary(traveller_id) => {
                    if let Some(traveller) = self.travellers.get_mut(traveller_id) {
                        traveller.state_mut().graphics_active = true;
                    }
                }
                HiddenVisual::Clone(traveller_id) => {
                    if let Some(traveller) = self.travellers.get_mut(traveller_id) {
                        traveller.state_mut().clone_active = true;
                    }
                }
            }
        }
    }

    /// Writes the update phase's offset multipliers back into the material
    /// slots that [`PortalSystem::hide_travellers`] overwrote.
    fn restore_slice_multipliers(&mut self, id: PortalId, linked_id: PortalId) {
        for portal_id in [id, linked_id] {
            for &traveller_id in &self.portals[portal_id.0].tracked {
                let Some(traveller) = self.travellers.get_mut(traveller_id) else {
                    continue;
                };
                let state = traveller.state_mut();
                let primary = state.centre_offset_multiplier;
                let clone = state.clone_centre_offset_multiplier;
                for params in &mut state.materials {
                    params.centre_offset_multiplier = primary;
                }
                for params in &mut state.clone_materials {
                    params.centre_offset_multiplier = clone;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use glam::{Mat4, Quat, Vec2, Vec3};

    use selenite_math::frame::Frame;
    use selenite_math::projection::Lens;

    use super::{PortalId, RenderBackend};
    use crate::camera::Camera;
    use crate::config::PortalSettings;
    use crate::portal::PortalSystem;
    use crate::traveller::{PortalTraveller, Prop, TravellerId, HIDDEN_MULTIPLIER};

    fn init_logging() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    #[derive(Default)]
    struct RecordingBackend {
        recreated: Vec<(PortalId, u32, u32)>,
        rendered: Vec<(PortalId, Vec3, Mat4)>,
        restored: u32,
    }

    impl RenderBackend for RecordingBackend {
        fn recreate_view_target(&mut self, portal: PortalId, width: u32, height: u32) {
            self.recreated.push((portal, width, height));
        }

        fn render_view(&mut self, portal: PortalId, camera: &Camera, _scene: &PortalSystem) {
            self.rendered
                .push((portal, camera.frame.position, camera.projection_matrix()));
        }

        fn restore_screen_material(&mut self, portal: PortalId) {
            let _ = portal;
            self.restored += 1;
        }
    }

    fn test_lens() -> Lens {
        Lens {
            fov_y: 60.0_f32.to_radians(),
            aspect: 1.0,
            near: 0.1,
            far: 100.0,
        }
    }

    fn camera_at(position: Vec3, rotation: Quat) -> Camera {
        Camera::new(Frame::new(position, rotation), test_lens())
    }

    fn facing_pair() -> (PortalSystem, PortalId, PortalId) {
        let mut system = PortalSystem::new(PortalSettings::default());
        let a = system.add_portal(Frame::new(Vec3::ZERO, Quat::IDENTITY), Vec2::new(1.0, 1.0));
        let b = system.add_portal(
            Frame::new(Vec3::new(0.0, 0.0, 10.0), Quat::from_rotation_y(PI)),
            Vec2::new(1.0, 1.0),
        );
        system.link(a, b);
        (system, a, b)
    }

    #[test]
    fn unlinked_portal_renders_nothing() {
        init_logging();
        let mut system = PortalSystem::new(PortalSettings::default());
        let lone = system.add_portal(Frame::IDENTITY, Vec2::ONE);
        let mut backend = RecordingBackend::default();

        let camera = camera_at(Vec3::new(0.0, 0.0, -5.0), Quat::IDENTITY);
        assert_eq!(
            system.render_portal(lone, &camera, (1280, 720), &mut backend),
            0
        );
        assert!(backend.rendered.is_empty());
    }

    #[test]
    fn skips_when_linked_screen_is_not_on_screen() {
        let (mut system, a, _) = facing_pair();
        let mut backend = RecordingBackend::default();

        // Player faces away from both portals.
        let camera = camera_at(Vec3::new(0.0, 0.0, -5.0), Quat::from_rotation_y(PI));
        assert_eq!(
            system.render_portal(a, &camera, (1280, 720), &mut backend),
            0
        );
        assert!(backend.rendered.is_empty());
        // The view target is only allocated once a render is actually due.
        assert!(backend.recreated.is_empty());
    }

    #[test]
    fn facing_pair_renders_to_the_recursion_limit() {
        let (mut system, a, _) = facing_pair();
        let mut backend = RecordingBackend::default();

        let camera = camera_at(Vec3::new(0.0, 0.0, -5.0), Quat::IDENTITY);
        let count = system.render_portal(a, &camera, (1280, 720), &mut backend);

        assert_eq!(count, system.settings().recursion_limit);
        assert_eq!(backend.rendered.len() as u32, count);
        assert_eq!(backend.restored, count);

        // Facing portals fold the corridor onto two alternating camera
        // poses, rendered deepest-first.
        let expected = [15.0, -5.0, 15.0, -5.0, 15.0];
        assert_eq!(backend.rendered.len(), expected.len());
        for ((_, position, _), depth) in backend.rendered.iter().zip(expected) {
            assert!((position.z - depth).abs() < 1e-3);
        }

        assert!(!system.portal(a).screen.shadow_only);
    }

    #[test]
    fn renders_a_single_pass_when_recursion_cannot_be_seen() {
        let mut system = PortalSystem::new(PortalSettings::default());
        // A is far off to the side, so its screen is nowhere near the view
        // B's virtual camera has of the scene.
        let a = system.add_portal(
            Frame::new(Vec3::new(100.0, 0.0, 0.0), Quat::IDENTITY),
            Vec2::new(1.0, 1.0),
        );
        let b = system.add_portal(
            Frame::new(Vec3::new(0.0, 0.0, 10.0), Quat::from_rotation_y(PI)),
            Vec2::new(1.0, 1.0),
        );
        system.link(a, b);
        let mut backend = RecordingBackend::default();

        let camera = camera_at(Vec3::new(0.0, 0.0, -5.0), Quat::IDENTITY);
        let count = system.render_portal(a, &camera, (1280, 720), &mut backend);

        assert_eq!(count, 1);
        let (_, position, _) = backend.rendered[0];
        assert!((position - Vec3::new(100.0, 0.0, 15.0)).length() < 1e-3);
    }

    #[test]
    fn view_target_is_reused_until_the_display_resizes() {
        let (mut system, a, _) = facing_pair();
        let mut backend = RecordingBackend::default();
        let camera = camera_at(Vec3::new(0.0, 0.0, -5.0), Quat::IDENTITY);

        system.render_portal(a, &camera, (1280, 720), &mut backend);
        system.render_portal(a, &camera, (1280, 720), &mut backend);
        assert_eq!(backend.recreated, vec![(a, 1280, 720)]);

        system.render_portal(a, &camera, (1920, 1080), &mut backend);
        assert_eq!(
            backend.recreated,
            vec![(a, 1280, 720), (a, 1920, 1080)]
        );
    }

    #[test]
    fn near_clip_falls_back_when_the_virtual_camera_grazes_the_surface() {
        let (mut system, a, _) = facing_pair();
        let mut backend = RecordingBackend::default();

        // Standing just short of B places the virtual camera a tenth of a
        // unit from A's surface, inside the oblique stability limit.
        let camera = camera_at(Vec3::new(0.0, 0.0, 9.85), Quat::IDENTITY);
        let count = system.render_portal(a, &camera, (1280, 720), &mut backend);

        assert_eq!(count, 1);
        let (_, position, projection) = backend.rendered[0];
        assert!((position - Vec3::new(0.0, 0.0, 0.15)).length() < 1e-5);
        assert_eq!(projection, test_lens().perspective());
    }

    #[test]
    fn grazing_the_surface_from_further_out_stays_oblique() {
        let (mut system, a, _) = facing_pair();
        let mut backend = RecordingBackend::default();

        let camera = camera_at(Vec3::new(0.0, 0.0, 9.0), Quat::IDENTITY);
        system.render_portal(a, &camera, (1280, 720), &mut backend);

        let (_, _, projection) = backend.rendered[0];
        assert_ne!(projection, test_lens().perspective());
    }

    #[test]
    fn hidden_travellers_are_restored_after_the_render() {
        init_logging();
        let (mut system, a, b) = facing_pair();
        let camera = camera_at(Vec3::new(0.0, 0.0, -5.0), Quat::IDENTITY);

        // One traveller crossing A, one crossing B whose clone appears at A.
        let crossing = system
            .register_traveller(Box::new(Prop::new(
                Frame::new(Vec3::new(0.0, 0.0, 0.5), Quat::IDENTITY),
                1,
            )))
            .unwrap();
        let bystander = system
            .register_traveller(Box::new(Prop::new(
                Frame::new(Vec3::new(0.0, 0.0, 9.5), Quat::IDENTITY),
                1,
            )))
            .unwrap();
        system.on_trigger_enter(a, crossing, &camera);
        system.on_trigger_enter(b, bystander, &camera);
        system.update_all(&camera);

        let mut backend = RecordingBackend::default();
        let count = system.render_portal(a, &camera, (1280, 720), &mut backend);
        assert!(count > 0);

        // The crossing traveller shares A's far side with the virtual
        // camera, so it was disabled outright; the bystander's materials
        // were forced to the hidden offset. Both must be back to their
        // update-phase values now.
        let state = system.travellers.get(crossing).unwrap().state();
        assert!(state.graphics_active);
        assert_eq!(
            state.materials[0].centre_offset_multiplier,
            state.centre_offset_multiplier
        );

        let state = system.travellers.get(bystander).unwrap().state();
        assert!(state.clone_active);
        assert_eq!(
            state.clone_materials[0].centre_offset_multiplier,
            state.clone_centre_offset_multiplier
        );
    }

    /// Checks what the draw callback can actually read off the scene while
    /// a pass is in flight.
    struct ObservingBackend {
        portal: PortalId,
        crossing: TravellerId,
        bystander: TravellerId,
        observations: Vec<(bool, bool, bool)>,
    }

    impl RenderBackend for ObservingBackend {
        fn recreate_view_target(&mut self, _portal: PortalId, _width: u32, _height: u32) {}

        fn render_view(&mut self, _portal: PortalId, _camera: &Camera, scene: &PortalSystem) {
            let shadow_only = scene.portal(self.portal).screen.shadow_only;
            let crossing_hidden = !scene
                .travellers
                .get(self.crossing)
                .unwrap()
                .state()
                .graphics_active;
            let bystander_masked = scene
                .travellers
                .get(self.bystander)
                .unwrap()
                .state()
                .clone_materials[0]
                .centre_offset_multiplier
                == HIDDEN_MULTIPLIER;
            self.observations
                .push((shadow_only, crossing_hidden, bystander_masked));
        }

        fn restore_screen_material(&mut self, _portal: PortalId) {}
    }

    #[test]
    fn backend_sees_hidden_state_during_each_pass() {
        let (mut system, a, b) = facing_pair();
        let camera = camera_at(Vec3::new(0.0, 0.0, -5.0), Quat::IDENTITY);

        let crossing = system
            .register_traveller(Box::new(Prop::new(
                Frame::new(Vec3::new(0.0, 0.0, 0.5), Quat::IDENTITY),
                1,
            )))
            .unwrap();
        let bystander = system
            .register_traveller(Box::new(Prop::new(
                Frame::new(Vec3::new(0.0, 0.0, 9.5), Quat::IDENTITY),
                1,
            )))
            .unwrap();
        system.on_trigger_enter(a, crossing, &camera);
        system.on_trigger_enter(b, bystander, &camera);
        system.update_all(&camera);

        let mut backend = ObservingBackend {
            portal: a,
            crossing,
            bystander,
            observations: Vec::new(),
        };
        let count = system.render_portal(a, &camera, (1280, 720), &mut backend);

        // Every pass must be able to read the transient render state off
        // the scene reference: the shadow-only screen, the disabled
        // crossing traveller and the bystander's masked clone materials.
        assert_eq!(backend.observations.len() as u32, count);
        assert!(backend
            .observations
            .iter()
            .all(|&(shadow_only, crossing_hidden, bystander_masked)| {
                shadow_only && crossing_hidden && bystander_masked
            }));
    }

    #[test]
    fn render_all_covers_both_portals() {
        let (mut system, _, _) = facing_pair();
        let mut backend = RecordingBackend::default();

        let camera = camera_at(Vec3::new(0.0, 0.0, -5.0), Quat::IDENTITY);
        system.update_all(&camera);
        let total = system.render_all(&camera, (1280, 720), &mut backend);

        // Both portals are on screen, so each renders its full chain.
        assert_eq!(total, system.settings().recursion_limit * 2);
    }
}
