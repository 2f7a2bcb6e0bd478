use std::marker::PhantomData;
use std::sync::MutexGuard;

pub mod optimistic_lock;
pub(crate) mod sync;
pub mod u8_keys;

pub type PhantomUnsend = PhantomData<MutexGuard<'static, ()>>;
