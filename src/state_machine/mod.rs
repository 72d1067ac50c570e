/// The [`StateMachine`] trait separates the state transitions of a component from the machinery
/// that shares it between tasks.
///
/// # Functionality
/// A state machine consumes [`Input`](StateMachine::Input) through
/// [`process_input`](StateMachine::process_input) and reports anything its callers must act on
/// through [`poll_output`](StateMachine::poll_output). Both associated types are usually enums
/// when there are several kinds of input or output, and plain structs otherwise.
///
/// Owners wrap the machine in whatever synchronization they need (a lock, a task, a channel) and
/// perform the side effects the outputs ask for after releasing it. The connection tracker in
/// [`tunnelstate`](crate::tunnelstate) is the canonical example: its table of slots is a state
/// machine over lifecycle events, and the tracker holds it behind a single `RwLock`.
///
/// # Invariants
/// Implementors *must* be pure, so the same sequence of inputs always produces the same state and
/// the same outputs.
///
/// ## No Interior Mutability
/// State is only modified through `&mut self`. No [`std::cell`] containers, no [`std::sync`]
/// locks, no reference counted pointers.
///
/// ## No IO
/// No [`std::io`], no [`std::net`], no logging that the transitions depend on. Reading the clock
/// or system entropy counts as IO; if a machine needs either it receives it as input.
///
/// ## No Concurrency, No Async, No Blocking
/// Transitions run to completion on the caller's thread without awaiting or blocking, which is
/// what allows an owner to hold a synchronous lock across [`process_input`](StateMachine::process_input).
///
/// # Side Effects
/// Outputs are the only way a machine asks for something to happen. Logging an unrecognized
/// input, for example, is done by the owner after polling an output describing it.
///
/// # Example
/// ```ignore
/// impl StateMachine for ConnectionTable {
///     type Input = Event;
///     type Output = UnrecognizedEvent;
///
///     fn process_input(&mut self, event: Event) {
///         match event.event_type {
///             EventType::Connected => self.connect(event.index, event.protocol),
///             EventType::Disconnected => self.disconnect(event.index),
///             _ => self.unrecognized.push_back(UnrecognizedEvent(event)),
///         }
///     }
///
///     fn poll_output(&mut self) -> Option<UnrecognizedEvent> {
///         self.unrecognized.pop_front()
///     }
/// }
/// ```
pub trait StateMachine {
    /// The type of input that is [processed](StateMachine::process_input) by the state machine.
    type Input;
    /// The type of output that is [polled](StateMachine::poll_output) from the state machine.
    type Output;

    /// Process the provided `input` into the state machine.
    fn process_input(&mut self, input: Self::Input);

    /// Poll the state machine for output, returning the first available output if present.
    fn poll_output(&mut self) -> Option<Self::Output>;
}
