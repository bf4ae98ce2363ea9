use crate::traits::{DynamicalSystem, Scalar, Steppable};

fn zeros<T: Scalar>(dim: usize) -> Vec<T> {
    vec![T::zero(); dim]
}

fn constant<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4<T: Scalar> {
    k: [Vec<T>; 4],
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k: [zeros(dim), zeros(dim), zeros(dim), zeros(dim)],
            tmp: zeros(dim),
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let half = constant::<T>(0.5);
        let sixth = constant::<T>(1.0 / 6.0);
        let two = constant::<T>(2.0);
        let t0 = *t;
        let [k1, k2, k3, k4] = &mut self.k;

        system.apply(t0, state, k1);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * half * k1[i];
        }
        system.apply(t0 + dt * half, &self.tmp, k2);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * half * k2[i];
        }
        system.apply(t0 + dt * half, &self.tmp, k3);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * k3[i];
        }
        system.apply(t0 + dt, &self.tmp, k4);

        for i in 0..state.len() {
            state[i] = state[i] + dt * sixth * (k1[i] + two * k2[i] + two * k3[i] + k4[i]);
        }

        *t = t0 + dt;
    }
}

const TSIT5_C: [f64; 6] = [0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0];

const TSIT5_A: [[f64; 5]; 6] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [0.161, 0.0, 0.0, 0.0, 0.0],
    [-0.008480655492356989, 0.335480655492357, 0.0, 0.0, 0.0],
    [2.897153057105493, -6.359448489975075, 4.3622954328695815, 0.0, 0.0],
    [
        5.325864828439257,
        -11.748883564062828,
        7.4955393428898365,
        -0.09249506636175525,
        0.0,
    ],
    [
        5.86145544294642,
        -12.92096931784711,
        8.159367898576159,
        -0.071584973281401,
        -0.028269050394068383,
    ],
];

/// Fifth-order weights.
const TSIT5_B: [f64; 6] = [
    0.09646076681806523,
    0.01,
    0.4798896504144996,
    1.379008574103742,
    -3.290069515436081,
    2.324710524099774,
];

/// Tsitouras 5/4 Solver, fixed step (5th order solution only).
pub struct Tsit5<T: Scalar> {
    k: Vec<Vec<T>>,
    tmp: Vec<T>,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k: (0..TSIT5_B.len()).map(|_| zeros(dim)).collect(),
            tmp: zeros(dim),
        }
    }
}

impl<T: Scalar> Steppable<T> for Tsit5<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;

        for stage in 0..TSIT5_B.len() {
            for i in 0..state.len() {
                let mut incr = T::zero();
                for (j, &a) in TSIT5_A[stage][..stage].iter().enumerate() {
                    incr = incr + constant::<T>(a) * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * incr;
            }
            system.apply(t0 + constant::<T>(TSIT5_C[stage]) * dt, &self.tmp, &mut self.k[stage]);
        }

        for i in 0..state.len() {
            let mut incr = T::zero();
            for (j, &b) in TSIT5_B.iter().enumerate() {
                incr = incr + constant::<T>(b) * self.k[j][i];
            }
            state[i] = state[i] + dt * incr;
        }

        *t = t0 + dt;
    }
}
