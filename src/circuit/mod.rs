//! Equivalent circuit topologies and their frequency response.
//!
//! A topology is written with elements joined in series by `-` and grouped in parallel by
//! `p(a,b,...)`, for example `R0-p(R1,CPE1)-W1`. Supported elements are
//!
//! | element | parameters | impedance |
//! |---|---|---|
//! | `R` | R | $R$ |
//! | `C` | C | $1 / j \omega C$ |
//! | `L` | L | $j \omega L$ |
//! | `CPE` | Q, α | $1 / Q (j \omega)^\alpha$ |
//! | `W` | σ | $\sigma (1 - j) / \sqrt{\omega}$ |
//! | `Wo` | Z0, τ | $Z_0 \coth\sqrt{j \omega \tau} / \sqrt{j \omega \tau}$ |
//! | `Ws` | Z0, τ | $Z_0 \tanh\sqrt{j \omega \tau} / \sqrt{j \omega \tau}$ |
//!
//! Parameters are ordered as the elements appear in the topology string.

mod library;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use ndarray_linalg::c64;

pub use library::{CircuitGuess, CircuitLibrary};

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementKind {
    Resistor,
    Capacitor,
    Inductor,
    ConstantPhase,
    Warburg,
    WarburgOpen,
    WarburgShort,
}

impl ElementKind {
    /// Prefixes in matching order, longest first where one prefix extends another
    const PREFIXES: [(&'static str, Self); 7] = [
        ("CPE", Self::ConstantPhase),
        ("Wo", Self::WarburgOpen),
        ("Ws", Self::WarburgShort),
        ("W", Self::Warburg),
        ("R", Self::Resistor),
        ("C", Self::Capacitor),
        ("L", Self::Inductor),
    ];

    pub const fn num_parameters(self) -> usize {
        match self {
            Self::Resistor | Self::Capacitor | Self::Inductor | Self::Warburg => 1,
            Self::ConstantPhase | Self::WarburgOpen | Self::WarburgShort => 2,
        }
    }

    /// Impedance of a single element at angular frequency `omega`
    pub fn impedance(self, params: &[f64], omega: f64) -> c64 {
        match self {
            Self::Resistor => c64::new(params[0], 0.0),
            Self::Capacitor => c64::new(0.0, -1.0 / (omega * params[0])),
            Self::Inductor => c64::new(0.0, omega * params[0]),
            Self::ConstantPhase => {
                let (q, alpha) = (params[0], params[1]);
                let rotation = c64::from_polar(
                    omega.powf(alpha),
                    alpha * std::f64::consts::FRAC_PI_2,
                );
                (rotation * q).inv()
            }
            Self::Warburg => {
                let scale = params[0] / omega.sqrt();
                c64::new(scale, -scale)
            }
            Self::WarburgOpen => {
                let s = c64::new(0.0, omega * params[1]).sqrt();
                c64::new(params[0], 0.0) / (s * saturating_tanh(s))
            }
            Self::WarburgShort => {
                let s = c64::new(0.0, omega * params[1]).sqrt();
                saturating_tanh(s) * params[0] / s
            }
        }
    }
}

/// `tanh` that does not overflow for arguments with a large real part
fn saturating_tanh(z: c64) -> c64 {
    if z.re > 20.0 {
        c64::new(1.0, 0.0)
    } else {
        z.tanh()
    }
}

#[derive(Clone, Debug)]
enum Node {
    Element {
        kind: ElementKind,
        /// Index of the element's first parameter in the flat parameter vector
        offset: usize,
    },
    Series(Vec<Node>),
    Parallel(Vec<Node>),
}

impl Node {
    fn impedance(&self, params: &[f64], omega: f64) -> c64 {
        match self {
            Self::Element { kind, offset } => {
                kind.impedance(&params[*offset..*offset + kind.num_parameters()], omega)
            }
            Self::Series(children) => children
                .iter()
                .map(|child| child.impedance(params, omega))
                .sum(),
            Self::Parallel(children) => children
                .iter()
                .map(|child| child.impedance(params, omega).inv())
                .sum::<c64>()
                .inv(),
        }
    }
}

/// A parsed equivalent circuit topology
#[derive(Clone, Debug)]
pub struct Circuit {
    topology: String,
    root: Node,
    parameter_names: Vec<String>,
}

impl Circuit {
    /// Parse a topology string
    ///
    /// # Errors
    /// Returns [`Error::CircuitSyntax`] on unknown elements, unbalanced parentheses, parallel
    /// blocks with a single branch or repeated element names.
    ///
    /// # Examples
    ///
    /// ```
    /// use electrochem::circuit::Circuit;
    ///
    /// let circuit = Circuit::parse("R0-p(R1,CPE1)").unwrap();
    /// assert_eq!(circuit.parameter_names(), ["R0", "R1", "CPE1_0", "CPE1_1"]);
    /// ```
    pub fn parse(topology: &str) -> Result<Self> {
        let mut parser = Parser {
            topology,
            chars: topology.chars().filter(|c| !c.is_whitespace()).collect(),
            position: 0,
            parameter_names: vec![],
            element_names: HashSet::new(),
        };
        if parser.chars.is_empty() {
            return Err(parser.error("topology is empty"));
        }
        let root = parser.series()?;
        if parser.position != parser.chars.len() {
            return Err(parser.error(&format!(
                "unexpected `{}` at position {}",
                parser.chars[parser.position], parser.position
            )));
        }
        Ok(Self {
            topology: parser.chars.iter().collect(),
            root,
            parameter_names: parser.parameter_names,
        })
    }

    pub fn topology(&self) -> &str {
        &self.topology
    }

    pub fn num_parameters(&self) -> usize {
        self.parameter_names.len()
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    /// Impedance at angular frequency `omega`. `params` must hold
    /// [`num_parameters`](Self::num_parameters) values.
    pub fn impedance(&self, params: &[f64], omega: f64) -> c64 {
        self.root.impedance(params, omega)
    }

    /// Impedance at each frequency in Hz
    pub fn predict(&self, params: &[f64], frequency: &[f64]) -> Vec<c64> {
        frequency
            .iter()
            .map(|f| self.impedance(params, 2.0 * std::f64::consts::PI * f))
            .collect()
    }
}

impl FromStr for Circuit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topology)
    }
}

struct Parser<'a> {
    topology: &'a str,
    chars: Vec<char>,
    position: usize,
    parameter_names: Vec<String>,
    element_names: HashSet<String>,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> Error {
        Error::CircuitSyntax {
            topology: self.topology.to_owned(),
            reason: reason.to_owned(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn starts_with(&self, prefix: &str) -> bool {
        let mut ahead = self.chars[self.position..].iter();
        prefix.chars().all(|c| ahead.next() == Some(&c))
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.peek() {
            Some(c) if c == expected => {
                self.position += 1;
                Ok(())
            }
            Some(c) => Err(self.error(&format!(
                "expected `{expected}` at position {}, found `{c}`",
                self.position
            ))),
            None => Err(self.error(&format!("expected `{expected}`, found end of topology"))),
        }
    }

    fn series(&mut self) -> Result<Node> {
        let mut terms = vec![self.term()?];
        while self.peek() == Some('-') {
            self.position += 1;
            terms.push(self.term()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Node::Series(terms)
        })
    }

    fn term(&mut self) -> Result<Node> {
        if self.starts_with("p(") {
            self.position += 2;
            let mut branches = vec![self.series()?];
            while self.peek() == Some(',') {
                self.position += 1;
                branches.push(self.series()?);
            }
            self.expect(')')?;
            if branches.len() < 2 {
                return Err(self.error("parallel blocks need at least two branches"));
            }
            return Ok(Node::Parallel(branches));
        }
        self.element()
    }

    fn element(&mut self) -> Result<Node> {
        let Some((prefix, kind)) = ElementKind::PREFIXES
            .iter()
            .find(|(prefix, _)| self.starts_with(prefix))
            .copied()
        else {
            return Err(match self.peek() {
                Some(c) => self.error(&format!(
                    "unknown element at position {}: `{c}`",
                    self.position
                )),
                None => self.error("expected an element, found end of topology"),
            });
        };
        self.position += prefix.len();

        let mut name = prefix.to_owned();
        while let Some(c) = self.peek().filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
            name.push(c);
            self.position += 1;
        }
        if !self.element_names.insert(name.clone()) {
            return Err(self.error(&format!("element `{name}` appears more than once")));
        }

        let offset = self.parameter_names.len();
        match kind.num_parameters() {
            1 => self.parameter_names.push(name),
            count => self
                .parameter_names
                .extend((0..count).map(|ii| format!("{name}_{ii}"))),
        }
        Ok(Node::Element { kind, offset })
    }
}
