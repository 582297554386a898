/// Boundary condition applied on the exterior faces of the casting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryCondition {
    /// No heat exchange.
    Adiabatic,
    /// Convective: q = h * (t_fluid - T_surface), with `h` in W/(m^2*K).
    Convective { h: f64, t_fluid: f64 },
}

impl BoundaryCondition {
    /// Convective loss to `t_ambient`, or adiabatic when `h` is zero.
    pub fn ambient(h: f64, t_ambient: f64) -> Self {
        if h > 0.0 {
            BoundaryCondition::Convective {
                h,
                t_fluid: t_ambient,
            }
        } else {
            BoundaryCondition::Adiabatic
        }
    }

    /// Contribution of a node carrying `area` (m^2) of exterior surface,
    /// as `(diagonal, right-hand side)` terms of the implicit system.
    pub fn nodal_terms(&self, area: f64) -> (f64, f64) {
        match *self {
            BoundaryCondition::Adiabatic => (0.0, 0.0),
            BoundaryCondition::Convective { h, t_fluid } => {
                let h_a = h * area;
                (h_a, h_a * t_fluid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambient_constructor() {
        assert_eq!(BoundaryCondition::ambient(0.0, 25.0), BoundaryCondition::Adiabatic);
        assert_eq!(
            BoundaryCondition::ambient(300.0, 25.0),
            BoundaryCondition::Convective {
                h: 300.0,
                t_fluid: 25.0
            }
        );
    }

    #[test]
    fn test_nodal_terms() {
        let bc = BoundaryCondition::ambient(50.0, 20.0);
        assert_eq!(bc.nodal_terms(0.5), (25.0, 500.0));
        assert_eq!(BoundaryCondition::Adiabatic.nodal_terms(3.0), (0.0, 0.0));
    }
}
