//! End-to-end wiring: a drive subsystem built from cells, combinators, a
//! state machine and a control loop, driven tick by tick.

use reflex_core::combinators as ops;
use reflex_core::prelude::*;
use reflex_core::{connect, poll_fn, BooleanPoll, ControlLoop, ControlLoopConfig};
use std::sync::Arc;

#[test]
fn test_joystick_to_motor_through_deadzone_and_limit() {
    let joystick = FloatCell::shared(0.0);
    let motor = FloatCell::shared(f32::NAN);
    let input: FloatInput = joystick.clone();

    let shaped = ops::limit(&ops::deadzone(&input, 0.1).unwrap(), -0.5, 0.5).unwrap();
    let _wire = connect(&shaped, motor.clone()).unwrap();
    assert_eq!(motor.get(), 0.0);

    joystick.set(0.05).unwrap();
    assert_eq!(motor.get(), 0.0);
    joystick.set(0.3).unwrap();
    assert_eq!(motor.get(), 0.3);
    joystick.set(f32::INFINITY).unwrap();
    assert_eq!(motor.get(), 0.5);
    joystick.set(-2.0).unwrap();
    assert_eq!(motor.get(), -0.5);
}

#[test]
fn test_state_machine_gates_periodic_work() {
    let cl = ControlLoop::new(ControlLoopConfig::default()).unwrap();
    let machine = StateMachine::new("Disabled", &["Disabled", "Teleop", "Auto"]).unwrap();
    let enable = BooleanCell::shared(false);
    let enable_input: BooleanInput = enable.clone();

    let _on = machine
        .set_state_when_from("Disabled", "Teleop", &*ops::on_press(&enable_input))
        .unwrap();
    let _off = machine
        .set_state_when("Disabled", &*ops::on_release(&enable_input))
        .unwrap();

    let counter = DiscreteCell::shared(0);
    let teleop_input = machine.is_state_input("Teleop").unwrap();
    let teleop: BooleanPoll = poll_fn(move || teleop_input.get());
    let gated = ops::event_when(cl.periodic(), teleop);
    let _count = {
        let counter = counter.clone();
        gated.on_event(event_fn(move || counter.set(counter.get() + 1)))
    };

    cl.tick();
    assert_eq!(counter.get(), 0);

    enable.set(true).unwrap();
    assert_eq!(machine.state_name_current(), "Teleop");
    cl.tick();
    cl.tick();
    assert_eq!(counter.get(), 2);

    enable.set(false).unwrap();
    assert_eq!(machine.state_name_current(), "Disabled");
    cl.tick();
    assert_eq!(counter.get(), 2);
}

#[test]
fn test_unknown_state_rejected_at_wiring_time() {
    let machine = StateMachine::new(0usize, &["A", "B"]).unwrap();
    let err = machine.on_enter_state("C", event_fn(|| Ok(()))).unwrap_err();
    assert!(err.is_usage_error());
    assert!(machine.set_state(7usize).is_err());
    assert_eq!(machine.state(), 0);
}

#[test]
fn test_toggle_via_event_sequence() {
    let button = Arc::new(EventCell::named("button"));
    let light = BooleanCell::shared(false);
    let _t = ops::toggle_when(&light, &*button);
    for _ in 0..3 {
        button.fire().unwrap();
    }
    assert!(light.get());
}
