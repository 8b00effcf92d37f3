use crate::component::{Component, ElabError};
use crate::expr::{clog2, CaseArm, Expr};
use crate::ir::ProcessDecl;

/// One edge of a state machine. Transitions are tried in declaration order;
/// a transition without a guard always fires.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: String,
    pub guard: Option<Expr>,
    pub to: String,
}

impl Transition {
    pub fn when(from: impl Into<String>, guard: Expr, to: impl Into<String>) -> Self {
        Self { from: from.into(), guard: Some(guard), to: to.into() }
    }

    pub fn always(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from: from.into(), guard: None, to: to.into() }
    }
}

/// A synchronous state machine over named states. Elaborates into one state
/// register plus a case-select next-state function.
#[derive(Debug, Clone)]
pub struct StateMachine {
    pub clock: String,
    pub reset: String,
    pub async_reset: bool,
    pub states: Vec<String>,
    pub initial: String,
    /// Output port (declared by the caller) that mirrors the state register.
    pub state_output: Option<String>,
    pub transitions: Vec<Transition>,
}

impl StateMachine {
    /// Encoded width of the state register.
    pub fn state_width(&self) -> usize {
        clog2(self.states.len() as u64).max(1)
    }

    pub fn state_index(&self, name: &str) -> Option<u64> {
        self.states.iter().position(|s| s == name).map(|i| i as u64)
    }
}

impl Component {
    /// Elaborates `machine` into this component, with the state register
    /// named `reg_name`.
    pub fn state_machine(
        &mut self,
        reg_name: &str,
        machine: StateMachine,
    ) -> Result<&mut Self, ElabError> {
        let width = machine.state_width();
        let unknown = |s: &str| ElabError::UnknownSignal { path: format!("state `{s}`") };
        let initial = machine.state_index(&machine.initial).ok_or_else(|| unknown(&machine.initial))?;

        let mut arms = Vec::with_capacity(machine.states.len());
        for (idx, state) in machine.states.iter().enumerate() {
            // Fold this state's transitions back-to-front so the first
            // declared one ends up outermost.
            let mut next = Expr::lit(idx as u64, width);
            for t in machine.transitions.iter().filter(|t| &t.from == state).rev() {
                let to = machine.state_index(&t.to).ok_or_else(|| unknown(&t.to))?;
                next = match &t.guard {
                    Some(guard) => Expr::mux(guard.clone(), Expr::lit(to, width), next),
                    None => Expr::lit(to, width),
                };
            }
            arms.push(CaseArm { value: idx as u64, expr: next });
        }
        for t in &machine.transitions {
            if machine.state_index(&t.from).is_none() {
                return Err(unknown(&t.from));
            }
        }

        let next_state = Expr::case(
            Expr::net(reg_name, width),
            arms,
            Some(Expr::lit(initial, width)),
        );

        self.reg(reg_name, width, initial);
        self.sequential(
            ProcessDecl::on(machine.clock.clone())
                .with_reset(machine.reset.clone(), machine.async_reset)
                .reset_value(reg_name, initial)
                .update(reg_name, next_state),
        );
        if let Some(out) = &machine.state_output {
            self.assign(out, Expr::net(reg_name, width));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traffic_light() -> (Component, StateMachine) {
        let machine = StateMachine {
            clock: "clk".into(),
            reset: "rst".into(),
            async_reset: false,
            states: vec!["red".into(), "green".into(), "yellow".into(), "all_off".into()],
            initial: "red".into(),
            state_output: Some("state".into()),
            transitions: vec![
                Transition::when("red", Expr::net("sensor", 1), "green"),
                Transition::always("green", "yellow"),
                Transition::always("yellow", "red"),
            ],
        };
        let mut c = Component::new("traffic");
        c.port_input("clk", 1)
            .port_input("rst", 1)
            .port_input("sensor", 1)
            .port_output("state", 2);
        (c, machine)
    }

    fn cycle(c: &mut Component) {
        c.set_input("clk", 0).unwrap();
        c.propagate().unwrap();
        c.set_input("clk", 1).unwrap();
        c.propagate().unwrap();
    }

    #[test]
    fn holds_in_initial_until_sensor() {
        let (mut c, machine) = traffic_light();
        c.state_machine("st", machine.clone()).unwrap();
        c.check().unwrap();

        c.set_input("rst", 1).unwrap();
        cycle(&mut c);
        c.set_input("rst", 0).unwrap();
        c.set_input("sensor", 0).unwrap();
        for _ in 0..3 {
            cycle(&mut c);
            assert_eq!(c.get_output("state").unwrap(), machine.state_index("red").unwrap());
        }

        c.set_input("sensor", 1).unwrap();
        cycle(&mut c);
        assert_eq!(c.get_output("state").unwrap(), machine.state_index("green").unwrap());
        c.set_input("sensor", 0).unwrap();
        cycle(&mut c);
        assert_eq!(c.get_output("state").unwrap(), machine.state_index("yellow").unwrap());
        cycle(&mut c);
        assert_eq!(c.get_output("state").unwrap(), machine.state_index("red").unwrap());
    }

    #[test]
    fn unknown_state_rejected() {
        let (mut c, mut machine) = traffic_light();
        machine.transitions.push(Transition::always("red", "purple"));
        assert!(c.state_machine("st", machine).is_err());
    }
}
