// Component B: decision and actuation
// Policy engine over the window, MCS actuator with control sink, and the loop tying them together.
pub mod policy;
pub mod actuator;
pub mod feedback;
