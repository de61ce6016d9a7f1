//! Argument accessors
//!
//! An accessor adapts one caller-supplied argument to the parameter type of
//! a task function, either as a value for an in-process call or as a
//! positional bind on a device instance.
//!
//! Ordinary arguments pass through by value with an `Into` conversion.
//! [`Seq`] yields its current position and advances on every consumption,
//! so replicated invocations see `0, 1, 2, ...`.

use crate::device::{DeviceInstance, DeviceParam};

/// Produce a parameter of type `P` for an in-process call.
pub trait Accessor<P> {
    /// Consume the argument once.
    fn access(&mut self) -> P;
}

/// Bind an argument to a device register slot.
pub trait DeviceAccessor<P>: Accessor<P> {
    /// Consume the argument once, binding it at `index`.
    fn bind(
        &mut self,
        instance: &mut dyn DeviceInstance,
        index: usize,
    );
}

impl<A, P> Accessor<P> for A
where
    A: Clone + Into<P>,
{
    #[inline]
    fn access(&mut self) -> P {
        self.clone().into()
    }
}

impl<A, P> DeviceAccessor<P> for A
where
    A: Clone + Into<P>,
    P: DeviceParam,
{
    #[inline]
    fn bind(
        &mut self,
        instance: &mut dyn DeviceInstance,
        index: usize,
    ) {
        self.access().bind_to(instance, index);
    }
}

/// Sequence-position argument.
///
/// Deliberately not `Clone`: a position must never be handed out twice.
#[derive(Debug, Default)]
pub struct Seq {
    pos: u64,
}

impl Seq {
    /// Start at position 0.
    #[inline]
    pub fn new() -> Self {
        Self { pos: 0 }
    }

    /// Start at an arbitrary position.
    #[inline]
    pub fn starting_at(pos: u64) -> Self {
        Self { pos }
    }

    /// Position the next consumption will yield.
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    #[inline]
    fn advance(&mut self) -> u64 {
        let pos = self.pos;
        self.pos += 1;
        pos
    }
}

/// Integer parameter types a [`Seq`] can be consumed as.
///
/// The conversion truncates to the declared width, as a register bind does.
pub trait SeqIndex {
    /// Convert a raw position.
    fn from_pos(pos: u64) -> Self;
}

macro_rules! impl_seq_index {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SeqIndex for $ty {
                #[inline]
                fn from_pos(pos: u64) -> Self {
                    pos as $ty
                }
            }
        )*
    };
}

impl_seq_index!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl<P: SeqIndex> Accessor<P> for Seq {
    #[inline]
    fn access(&mut self) -> P {
        P::from_pos(self.advance())
    }
}

impl<P> DeviceAccessor<P> for Seq
where
    P: SeqIndex + DeviceParam,
{
    #[inline]
    fn bind(
        &mut self,
        instance: &mut dyn DeviceInstance,
        index: usize,
    ) {
        P::from_pos(self.advance()).bind_to(instance, index);
    }
}

/// A list of arguments matched against a parameter tuple.
pub trait TaskArgs<Params> {
    /// Apply every accessor once, in parameter order.
    fn access_all(&mut self) -> Params;
}

/// A list of arguments that can be bound to a device instance.
pub trait DeviceArgs<Params>: TaskArgs<Params> {
    /// Bind argument `i` at register index `i`, starting at 0. Returns the
    /// number of arguments bound.
    fn bind_all(
        &mut self,
        instance: &mut dyn DeviceInstance,
    ) -> usize;
}

impl TaskArgs<()> for () {
    #[inline]
    fn access_all(&mut self) {}
}

impl DeviceArgs<()> for () {
    #[inline]
    fn bind_all(
        &mut self,
        _instance: &mut dyn DeviceInstance,
    ) -> usize {
        0
    }
}

macro_rules! impl_task_args {
    ($($arg:ident $param:ident $idx:tt),+) => {
        impl<$($arg, $param),+> TaskArgs<($($param,)+)> for ($($arg,)+)
        where
            $($arg: Accessor<$param>),+
        {
            #[inline]
            fn access_all(&mut self) -> ($($param,)+) {
                ($(self.$idx.access(),)+)
            }
        }

        impl<$($arg, $param),+> DeviceArgs<($($param,)+)> for ($($arg,)+)
        where
            $($arg: DeviceAccessor<$param>),+
        {
            fn bind_all(
                &mut self,
                instance: &mut dyn DeviceInstance,
            ) -> usize {
                let mut index = 0;
                $(
                    self.$idx.bind(instance, index);
                    index += 1;
                )+
                index
            }
        }
    };
}

impl_task_args!(A0 P0 0);
impl_task_args!(A0 P0 0, A1 P1 1);
impl_task_args!(A0 P0 0, A1 P1 1, A2 P2 2);
impl_task_args!(A0 P0 0, A1 P1 1, A2 P2 2, A3 P3 3);
impl_task_args!(A0 P0 0, A1 P1 1, A2 P2 2, A3 P3 3, A4 P4 4);
impl_task_args!(A0 P0 0, A1 P1 1, A2 P2 2, A3 P3 3, A4 P4 4, A5 P5 5);
impl_task_args!(A0 P0 0, A1 P1 1, A2 P2 2, A3 P3 3, A4 P4 4, A5 P5 5, A6 P6 6);
impl_task_args!(A0 P0 0, A1 P1 1, A2 P2 2, A3 P3 3, A4 P4 4, A5 P5 5, A6 P6 6, A7 P7 7);
