use std::cell::RefCell;
use std::rc::Rc;

use nvkms_evo::{ChannelId, Generation};
use nvkms_time::{run_due, FakeHostClock, NANOS_PER_MICRO};
use nvkms_vrr::frame_pacing::layout;
use nvkms_vrr::link::ConnectorKind;
use nvkms_vrr::testing::{LinkCall, MockLink, MockRm, RecordingSink, RmCall};
use nvkms_vrr::{
    run_timers, AllowAdaptiveSync, DisplayDevice, DisplayDeviceConfig, DpyVrrCaps, DpyVrrType,
    FlipRequest, HeadFlip, HeadModeset, ModesetRequest, RasterTimings, VrrState,
};
use pretty_assertions::assert_eq;

struct Rig {
    dev: Rc<RefCell<DisplayDevice>>,
    rm: MockRm,
    link: MockLink,
    sink: RecordingSink,
    clock: Rc<FakeHostClock>,
}

fn rig(generation: Generation) -> Rig {
    let rm = MockRm::new();
    let link = MockLink::new();
    let sink = RecordingSink::new();
    let clock = Rc::new(FakeHostClock::new(1_000));
    let config = DisplayDeviceConfig {
        generation,
        ..DisplayDeviceConfig::default()
    };
    let dev = DisplayDevice::new(
        config,
        Box::new(sink.clone()),
        Box::new(rm.clone()),
        Box::new(link.clone()),
        clock.clone(),
    )
    .unwrap();
    Rig {
        dev,
        rm,
        link,
        sink,
        clock,
    }
}

fn mode_1080p(refresh_hz: u32) -> RasterTimings {
    RasterTimings {
        raster_width: 2200,
        raster_height: 1125,
        pixel_clock_khz: 2200 * 1125 * refresh_hz / 1000,
        interlaced: false,
    }
}

fn adaptive_sync_head(head: u32, connector: ConnectorKind) -> HeadModeset {
    HeadModeset {
        head,
        timings: Some(mode_1080p(120)),
        dpy: DpyVrrCaps {
            vrr_type: DpyVrrType::AdaptiveSyncDefaultlisted,
            connector,
            edid_min_refresh_hz: Some(48),
            ..DpyVrrCaps::default()
        },
        ..HeadModeset::default()
    }
}

fn gsync_head(head: u32) -> HeadModeset {
    HeadModeset {
        head,
        timings: Some(mode_1080p(60)),
        dpy: DpyVrrCaps {
            vrr_type: DpyVrrType::Gsync,
            edid_min_refresh_hz: Some(30),
            ..DpyVrrCaps::default()
        },
        ..HeadModeset::default()
    }
}

fn modeset(heads: Vec<HeadModeset>) -> ModesetRequest {
    ModesetRequest {
        allow_vrr: true,
        allow_adaptive_sync: AllowAdaptiveSync::DefaultlistedOnly,
        heads,
    }
}

fn flip(allow_vrr: Option<bool>, heads: &[u32]) -> FlipRequest {
    FlipRequest {
        allow_vrr,
        heads: heads
            .iter()
            .map(|&head| HeadFlip {
                head,
                surface_offset: Some(0x20_0000),
                ..HeadFlip::default()
            })
            .collect(),
    }
}

#[test]
fn second_disable_touches_nothing() {
    let r = rig(Generation::Gen6);
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![adaptive_sync_head(
            0,
            ConnectorKind::DisplayPort,
        )]))
        .unwrap();
    assert!(r.dev.borrow().vrr().is_enabled());

    r.dev.borrow_mut().disable_vrr();
    assert_eq!(*r.dev.borrow().vrr(), VrrState::Disabled);
    let rm_calls = r.rm.calls().len();
    let link_calls = r.link.calls().len();
    let sink_events = r.sink.events().len();

    r.dev.borrow_mut().disable_vrr();
    assert_eq!(r.rm.calls().len(), rm_calls);
    assert_eq!(r.link.calls().len(), link_calls);
    assert_eq!(r.sink.events().len(), sink_events);
}

#[test]
fn enable_and_disable_toggle_the_link() {
    let r = rig(Generation::Gen6);
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![
            adaptive_sync_head(0, ConnectorKind::DisplayPort),
            adaptive_sync_head(1, ConnectorKind::Hdmi),
        ]))
        .unwrap();
    r.dev.borrow_mut().disable_vrr();

    assert_eq!(
        r.link.calls(),
        vec![
            LinkCall::AdaptiveSync {
                sd: 0,
                head: 0,
                enable: true
            },
            LinkCall::HdmiVrr {
                sd: 0,
                head: 1,
                enable: true
            },
            LinkCall::AdaptiveSync {
                sd: 0,
                head: 0,
                enable: false
            },
            LinkCall::HdmiVrr {
                sd: 0,
                head: 1,
                enable: false
            },
        ]
    );
    assert_eq!(r.rm.call_count("clear_vrr_pstate_switch"), 1);
}

#[test]
fn rejected_link_leaves_vrr_disabled() {
    let r = rig(Generation::Gen6);
    r.link.reject(0, 1);
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![
            adaptive_sync_head(0, ConnectorKind::DisplayPort),
            adaptive_sync_head(1, ConnectorKind::DisplayPort),
        ]))
        .unwrap();

    assert!(!r.dev.borrow().vrr().is_enabled());
    assert!(r.rm.calls().contains(&RmCall::SetVrrCapable {
        sd: 0,
        head: 0,
        capable: false
    }));
    assert_eq!(r.rm.call_count("query_vrr_support"), 0);
}

#[test]
fn failed_activation_disables_vrr_but_flip_proceeds() {
    let r = rig(Generation::Gen6);
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![adaptive_sync_head(
            0,
            ConnectorKind::DisplayPort,
        )]))
        .unwrap();
    r.rm.fail("set_rg_line_active", 0x40);

    let mut req = flip(Some(true), &[0]);
    let reply = r.dev.borrow_mut().flip(&mut req).unwrap();

    assert_eq!(*r.dev.borrow().vrr(), VrrState::Disabled);
    assert!(reply
        .report
        .for_channel(0, ChannelId::Window(0))
        .next()
        .is_some());
    assert_eq!(reply.vrr_semaphore_index, None);
    assert_eq!(r.dev.borrow().frame_pacing_subscription_refs(0), 0);
    assert_eq!(r.rm.call_count("unsubscribe"), 1);
    assert!(r.link.calls().contains(&LinkCall::AdaptiveSync {
        sd: 0,
        head: 0,
        enable: false
    }));
}

#[test]
fn pacing_sessions_share_one_subscription() {
    let r = rig(Generation::Gen6);
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![
            adaptive_sync_head(0, ConnectorKind::DisplayPort),
            adaptive_sync_head(1, ConnectorKind::DisplayPort),
        ]))
        .unwrap();

    r.dev
        .borrow_mut()
        .flip(&mut flip(Some(true), &[0, 1]))
        .unwrap();
    {
        let dev = r.dev.borrow();
        assert!(dev.vrr().is_active());
        assert!(dev.head(0, 0).unwrap().frame_pacing().is_active());
        assert!(dev.head(0, 1).unwrap().frame_pacing().is_active());
        assert_eq!(dev.frame_pacing_subscription_refs(0), 2);
    }
    assert_eq!(r.rm.call_count("subscribe_vrr_set_timeout"), 1);
    assert_eq!(r.rm.call_count("arm_lightweight_supervisor"), 4);

    let opened: Vec<_> =
        r.rm.calls()
            .into_iter()
            .filter_map(|call| match call {
                RmCall::SetRgLineActive { head, params, .. } => Some((head, params)),
                _ => None,
            })
            .collect();
    assert_eq!(opened.len(), 2);
    for (_, params) in &opened {
        assert!(params.enable);
        assert_eq!(params.min_frame_time_ns, 8_333_333);
        assert_eq!(params.max_frame_time_ns, 20_833 * NANOS_PER_MICRO);
    }

    r.dev
        .borrow_mut()
        .flip(&mut flip(Some(false), &[0, 1]))
        .unwrap();
    let dev = r.dev.borrow();
    assert!(dev.vrr().is_enabled());
    assert!(!dev.vrr().is_active());
    assert!(!dev.head(0, 0).unwrap().frame_pacing().is_active());
    assert_eq!(dev.frame_pacing_subscription_refs(0), 0);
    assert_eq!(r.rm.call_count("unsubscribe"), 1);
    assert_eq!(r.rm.call_count("free_memory"), 2);
}

#[test]
fn firmware_pacing_decision_reaches_the_flip() {
    let r = rig(Generation::Gen6);
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![adaptive_sync_head(
            0,
            ConnectorKind::DisplayPort,
        )]))
        .unwrap();
    r.dev
        .borrow_mut()
        .flip(&mut flip(Some(true), &[0]))
        .unwrap();

    let shm = r.rm.shared_memory();
    shm.write_u32(layout::EXPECTED_FRAME_NUM, 3);
    shm.write_u32(layout::FLIP_TIME_ADJUSTMENT, 1);
    shm.write_u64(layout::FLIP_TIMESTAMP, 42_000_000);

    let mut req = flip(None, &[0]);
    req.heads[0].tearing = true;
    r.dev.borrow_mut().flip(&mut req).unwrap();
    assert!(!req.heads[0].tearing);
    assert_eq!(req.heads[0].timestamp_ns, 42_000_000);
}

#[test]
fn firmware_timeout_change_reprograms_display_rate_later() {
    let r = rig(Generation::Gen6);
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![adaptive_sync_head(
            0,
            ConnectorKind::DisplayPort,
        )]))
        .unwrap();
    r.dev
        .borrow_mut()
        .flip(&mut flip(Some(true), &[0]))
        .unwrap();
    assert_eq!(
        r.dev
            .borrow()
            .head(0, 0)
            .unwrap()
            .frame_pacing()
            .display_rate_timeout_us,
        20_833
    );

    r.rm.shared_memory().write_u32(layout::TIMEOUT_US, 25_000);
    r.dev.borrow_mut().on_vrr_set_timeout_event(0, 0).unwrap();
    r.dev.borrow_mut().on_vrr_set_timeout_event(0, 0).unwrap();
    assert_eq!(r.dev.borrow().pending_timers(), 1);
    r.sink.clear();

    assert_eq!(run_timers(&r.dev), 1);
    assert_eq!(
        r.dev
            .borrow()
            .head(0, 0)
            .unwrap()
            .frame_pacing()
            .display_rate_timeout_us,
        25_000
    );
    assert_eq!(r.sink.kickoffs(), vec![(0, ChannelId::Core)]);

    // Same timeout again: nothing to reprogram.
    r.dev.borrow_mut().on_vrr_set_timeout_event(0, 0).unwrap();
    r.sink.clear();
    assert_eq!(run_timers(&r.dev), 1);
    assert!(r.sink.kickoffs().is_empty());
}

#[test]
fn retimeout_after_teardown_is_a_no_op() {
    let r = rig(Generation::Gen6);
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![adaptive_sync_head(
            0,
            ConnectorKind::DisplayPort,
        )]))
        .unwrap();
    r.dev
        .borrow_mut()
        .flip(&mut flip(Some(true), &[0]))
        .unwrap();
    r.dev.borrow_mut().on_vrr_set_timeout_event(0, 0).unwrap();

    let timers = r.dev.borrow().timer_service();
    let Rig { dev, sink, .. } = r;
    drop(dev);
    sink.clear();

    assert_eq!(run_due(&timers, u64::MAX), 0);
    assert!(sink.events().is_empty());
}

#[test]
fn merged_secondary_flips_with_primary_pacing() {
    let r = rig(Generation::Gen6);
    let mut primary = adaptive_sync_head(0, ConnectorKind::DisplayPort);
    primary.merge_secondary_heads = vec![1];
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![
            primary,
            adaptive_sync_head(1, ConnectorKind::DisplayPort),
        ]))
        .unwrap();
    r.dev
        .borrow_mut()
        .flip(&mut flip(Some(true), &[0, 1]))
        .unwrap();

    {
        let dev = r.dev.borrow();
        assert!(dev.head(0, 0).unwrap().frame_pacing().is_active());
        assert!(!dev.head(0, 1).unwrap().frame_pacing().is_active());
    }
    assert_eq!(r.rm.call_count("set_rg_line_active"), 1);

    let shm = r.rm.shared_memory();
    shm.write_u32(layout::FLIP_TIME_ADJUSTMENT, 1);
    shm.write_u64(layout::FLIP_TIMESTAMP, 7_000_000);
    shm.write_u32(layout::TIMEOUT_US, 30_000);

    let mut req = flip(None, &[1]);
    r.dev.borrow_mut().flip(&mut req).unwrap();
    assert_eq!(req.heads[0].timestamp_ns, 7_000_000);

    r.dev.borrow_mut().on_vrr_set_timeout_event(0, 1).unwrap();
    run_timers(&r.dev);
    let dev = r.dev.borrow();
    for head in [0, 1] {
        assert_eq!(
            dev.head(0, head)
                .unwrap()
                .frame_pacing()
                .display_rate_timeout_us,
            30_000
        );
    }
}

#[test]
fn legacy_hardware_rotates_semaphores_and_unstalls() {
    let r = rig(Generation::Gen5);
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![gsync_head(0)]))
        .unwrap();

    let reply = r
        .dev
        .borrow_mut()
        .flip(&mut flip(Some(true), &[0]))
        .unwrap();
    assert_eq!(reply.vrr_semaphore_index, Some(0));
    assert_eq!(r.dev.borrow().pending_timers(), 1);
    assert_eq!(r.rm.call_count("set_rg_line_active"), 0);

    let reply = r.dev.borrow_mut().flip(&mut flip(None, &[0])).unwrap();
    assert_eq!(reply.vrr_semaphore_index, Some(1));
    assert_eq!(r.dev.borrow().pending_timers(), 1);

    // fmin 30 Hz: 33_333 us without a flip releases the stall.
    r.sink.clear();
    r.clock.advance_ns(33_333 * NANOS_PER_MICRO);
    assert_eq!(run_timers(&r.dev), 1);
    assert_eq!(r.sink.kickoffs(), vec![(0, ChannelId::Core)]);
    assert_eq!(r.dev.borrow().pending_timers(), 1);

    r.dev
        .borrow_mut()
        .flip(&mut flip(Some(false), &[0]))
        .unwrap();
    assert_eq!(r.dev.borrow().pending_timers(), 0);
    assert!(r.dev.borrow().head(0, 0).unwrap().unstall_timer().is_none());
}

#[test]
fn legacy_flip_of_one_head_keeps_every_active_head_unstalled() {
    let r = rig(Generation::Gen5);
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![gsync_head(0), gsync_head(1)]))
        .unwrap();
    r.dev
        .borrow_mut()
        .flip(&mut flip(Some(true), &[0, 1]))
        .unwrap();
    assert_eq!(r.dev.borrow().pending_timers(), 2);

    r.dev.borrow_mut().flip(&mut flip(None, &[0])).unwrap();
    {
        let dev = r.dev.borrow();
        assert!(dev.head(0, 1).unwrap().is_vrr_active());
        assert!(dev.head(0, 1).unwrap().unstall_timer().is_some());
        assert_eq!(dev.pending_timers(), 2);
    }

    r.sink.clear();
    r.clock.advance_ns(33_333 * NANOS_PER_MICRO);
    assert_eq!(run_timers(&r.dev), 2);
    assert_eq!(
        r.sink.kickoffs(),
        vec![(0, ChannelId::Core), (0, ChannelId::Core)]
    );
    assert_eq!(r.dev.borrow().pending_timers(), 2);
}

fn supervisor_calls(rm: &MockRm) -> Vec<RmCall> {
    rm.calls()
        .into_iter()
        .filter(|call| matches!(call, RmCall::ArmLightweightSupervisor { .. }))
        .collect()
}

#[test]
fn failed_supervisor_arm_disarms_heads_already_armed() {
    let r = rig(Generation::Gen6);
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![
            adaptive_sync_head(0, ConnectorKind::DisplayPort),
            adaptive_sync_head(1, ConnectorKind::DisplayPort),
        ]))
        .unwrap();
    r.rm.fail_on_head("arm_lightweight_supervisor", 1, 0x1f);

    r.dev
        .borrow_mut()
        .flip(&mut flip(Some(true), &[0, 1]))
        .unwrap();

    assert_eq!(*r.dev.borrow().vrr(), VrrState::Disabled);
    assert_eq!(
        supervisor_calls(&r.rm),
        vec![
            RmCall::ArmLightweightSupervisor {
                sd: 0,
                head: 0,
                is_vrr: true,
                arm: true
            },
            RmCall::ArmLightweightSupervisor {
                sd: 0,
                head: 1,
                is_vrr: true,
                arm: true
            },
            RmCall::ArmLightweightSupervisor {
                sd: 0,
                head: 0,
                is_vrr: true,
                arm: false
            },
        ]
    );
    assert_eq!(r.rm.call_count("set_rg_line_active"), 0);
}

#[test]
fn supervisor_arm_reports_each_heads_vrr_mode() {
    let r = rig(Generation::Gen6);
    let fixed = HeadModeset {
        head: 1,
        timings: Some(mode_1080p(60)),
        ..HeadModeset::default()
    };
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![gsync_head(0), fixed]))
        .unwrap();
    r.dev
        .borrow_mut()
        .flip(&mut flip(Some(true), &[0]))
        .unwrap();

    assert!(r.dev.borrow().vrr().is_active());
    let supervisor = |head, is_vrr, arm| RmCall::ArmLightweightSupervisor {
        sd: 0,
        head,
        is_vrr,
        arm,
    };
    assert_eq!(
        supervisor_calls(&r.rm),
        vec![
            supervisor(0, true, true),
            supervisor(1, false, true),
            supervisor(0, true, false),
            supervisor(1, false, false),
        ]
    );
}

#[test]
fn modeset_with_invalid_head_changes_nothing() {
    let r = rig(Generation::Gen6);
    r.dev
        .borrow_mut()
        .modeset(&modeset(vec![gsync_head(0)]))
        .unwrap();
    let rm_calls = r.rm.calls().len();
    let sink_events = r.sink.events().len();

    let result = r
        .dev
        .borrow_mut()
        .modeset(&modeset(vec![gsync_head(1), gsync_head(7)]));
    assert!(result.is_err());

    let dev = r.dev.borrow();
    assert!(!dev.head(0, 1).unwrap().is_active());
    assert!(dev.head(0, 0).unwrap().is_active());
    assert!(dev.vrr().is_enabled());
    assert_eq!(r.rm.calls().len(), rm_calls);
    assert_eq!(r.sink.events().len(), sink_events);
}
