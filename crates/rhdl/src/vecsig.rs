use crate::component::Component;
use crate::expr::{clog2, CaseArm, Expr};
use crate::wire::Direction;

/// A fixed-count ordered collection of equal-width signals. Constant-index
/// access is a plain net reference; dynamic indexing elaborates a
/// multiplexer tree keyed on the index expression.
#[derive(Debug, Clone)]
pub struct SignalVec {
    name: String,
    count: usize,
    width: usize,
}

impl SignalVec {
    pub fn new(name: impl Into<String>, count: usize, width: usize) -> Self {
        Self { name: name.into(), count, width }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn index_width(&self) -> usize {
        clog2(self.count as u64).max(1)
    }

    pub fn element_name(&self, index: usize) -> String {
        format!("{}_{index}", self.name)
    }

    /// Compile-time element access.
    pub fn get(&self, index: usize) -> Expr {
        Expr::net(self.element_name(index), self.width)
    }

    /// Dynamic element access: a case-select over all elements. Out-of-range
    /// index values read zero.
    pub fn select(&self, index: Expr) -> Expr {
        let arms = (0..self.count)
            .map(|i| CaseArm { value: i as u64, expr: self.get(i) })
            .collect();
        Expr::case(index, arms, Some(Expr::lit(0, self.width)))
    }
}

impl Component {
    /// Declares `count` internal nets `name_0 .. name_{count-1}`.
    pub fn vec_wire(&mut self, name: &str, count: usize, width: usize) -> SignalVec {
        let v = SignalVec::new(name, count, width);
        for i in 0..count {
            self.wire(&v.element_name(i), width);
        }
        v
    }

    pub fn vec_input(&mut self, name: &str, count: usize, width: usize) -> SignalVec {
        let v = SignalVec::new(name, count, width);
        for i in 0..count {
            self.port_input(&v.element_name(i), width);
        }
        v
    }

    pub fn vec_output(&mut self, name: &str, count: usize, width: usize) -> SignalVec {
        let v = SignalVec::new(name, count, width);
        for i in 0..count {
            self.port_output(&v.element_name(i), width);
        }
        v
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleField {
    pub name: String,
    pub direction: Direction,
    pub width: usize,
}

/// A record of named, directioned fields. `flip` inverts every field's
/// direction, giving the consumer-side view of a producer bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    pub fields: Vec<BundleField>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, direction: Direction, width: usize) -> Self {
        self.fields.push(BundleField { name: name.into(), direction, width });
        self
    }

    pub fn flip(&self) -> Bundle {
        Bundle {
            fields: self
                .fields
                .iter()
                .map(|f| BundleField {
                    name: f.name.clone(),
                    direction: f.direction.flipped(),
                    width: f.width,
                })
                .collect(),
        }
    }
}

impl Component {
    /// Declares every bundle field as a port named `prefix_field`.
    pub fn bundle_ports(&mut self, prefix: &str, bundle: &Bundle) -> &mut Self {
        for field in &bundle.fields {
            let name = format!("{prefix}_{}", field.name);
            match field.direction {
                Direction::In => self.port_input(&name, field.width),
                Direction::Out => self.port_output(&name, field.width),
            };
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_select_builds_mux_tree() {
        let mut c = Component::new("pick");
        let v = c.vec_input("data", 4, 8);
        c.port_input("idx", 2).port_output("y", 8);
        c.assign("y", v.select(Expr::net("idx", 2)));
        c.check().unwrap();

        for (i, value) in [0x11u64, 0x22, 0x33, 0x44].iter().enumerate() {
            c.set_input(&v.element_name(i), *value).unwrap();
        }
        for i in 0..4u64 {
            c.set_input("idx", i).unwrap();
            c.propagate().unwrap();
            assert_eq!(c.get_output("y").unwrap(), [0x11, 0x22, 0x33, 0x44][i as usize]);
        }
    }

    #[test]
    fn bundle_flip_inverts_directions() {
        let b = Bundle::new()
            .field("valid", Direction::Out, 1)
            .field("ready", Direction::In, 1)
            .field("data", Direction::Out, 32);
        let f = b.flip();
        assert_eq!(f.fields[0].direction, Direction::In);
        assert_eq!(f.fields[1].direction, Direction::Out);
        assert_eq!(f.fields[2].direction, Direction::In);
        assert_eq!(b.flip().flip(), b);
    }

    #[test]
    fn bundle_ports_are_declared() {
        let b = Bundle::new().field("valid", Direction::In, 1).field("data", Direction::In, 8);
        let mut c = Component::new("sink");
        c.bundle_ports("in", &b).port_output("ok", 1);
        c.assign("ok", Expr::net("in_valid", 1));
        c.check().unwrap();
        c.set_input("in_valid", 1).unwrap();
        c.propagate().unwrap();
        assert_eq!(c.get_output("ok").unwrap(), 1);
    }
}
