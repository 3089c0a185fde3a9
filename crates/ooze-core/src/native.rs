//! Wraps plain Rust closures as native functions: each parameter is taken
//! by value or by shared reference, the result is a single value (`()`
//! counts as no outputs). The marker parameter lets the compiler pick the
//! right wrapping impl from the closure's signature alone.

use std::any::TypeId;
use std::marker::PhantomData;

use ooze_runtime::{Any, AnyFunction};

pub struct Owned<T>(PhantomData<T>);
pub struct Borrowed<T>(PhantomData<T>);

/// Type signature of a wrapped native function: `(type, is_borrow)` per
/// parameter, and the output leaf (`None` for unit).
pub struct NativeSignature {
    pub params: Vec<(TypeId, bool)>,
    pub output: Option<TypeId>,
}

pub trait NativeResult {
    fn result_type_id() -> TypeId;
    fn output_count() -> usize;
    fn into_outputs(self) -> Vec<Any>;
}

impl<T: Clone + Send + Sync + 'static> NativeResult for T {
    fn result_type_id() -> TypeId {
        TypeId::of::<T>()
    }

    fn output_count() -> usize {
        if TypeId::of::<T>() == TypeId::of::<()>() {
            0
        } else {
            1
        }
    }

    fn into_outputs(self) -> Vec<Any> {
        if TypeId::of::<T>() == TypeId::of::<()>() {
            Vec::new()
        } else {
            vec![Any::cloneable(self)]
        }
    }
}

pub trait IntoNativeFn<Marker>: Send + Sync + 'static {
    fn signature() -> NativeSignature;
    fn into_any_function(self) -> AnyFunction;
}

macro_rules! arg_type {
    (O $T:ident) => { $T };
    (B $T:ident) => { &$T };
}

macro_rules! arg_marker {
    (O $T:ident) => { Owned<$T> };
    (B $T:ident) => { Borrowed<$T> };
}

macro_rules! arg_is_borrow {
    (O) => {
        false
    };
    (B) => {
        true
    };
}

macro_rules! arg_extract {
    (O $T:ident, $owned:ident, $borrowed:ident, $nb:ident) => {
        $owned
            .next()
            .expect("missing native argument")
            .downcast::<$T>()
            .ok()
            .expect("native argument type mismatch")
    };
    (B $T:ident, $owned:ident, $borrowed:ident, $nb:ident) => {{
        let value = $borrowed[$nb]
            .downcast_ref::<$T>()
            .expect("native argument type mismatch");
        $nb += 1;
        value
    }};
}

macro_rules! impl_into_native_fn {
    ($(($m:ident $T:ident)),*) => {
        impl<F, R $(, $T)*> IntoNativeFn<(R, $(arg_marker!($m $T),)*)> for F
        where
            F: Fn($(arg_type!($m $T)),*) -> R + Send + Sync + 'static,
            R: NativeResult,
            $($T: Clone + Send + Sync + 'static,)*
        {
            fn signature() -> NativeSignature {
                NativeSignature {
                    params: vec![$((TypeId::of::<$T>(), arg_is_borrow!($m))),*],
                    output: (R::output_count() > 0).then(R::result_type_id),
                }
            }

            fn into_any_function(self) -> AnyFunction {
                AnyFunction::new(
                    vec![$(arg_is_borrow!($m)),*],
                    R::output_count(),
                    move |owned, borrowed| {
                        #[allow(unused_mut, unused_variables)]
                        let mut owned = owned.into_iter();
                        #[allow(unused_mut, unused_variables)]
                        let mut nb = 0usize;
                        #[allow(unused_variables)]
                        let borrowed = borrowed;
                        $(
                            #[allow(non_snake_case)]
                            let $T = arg_extract!($m $T, owned, borrowed, nb);
                        )*
                        self($($T),*).into_outputs()
                    },
                )
            }
        }
    };
}

impl_into_native_fn!();
impl_into_native_fn!((O A));
impl_into_native_fn!((B A));
impl_into_native_fn!((O A), (O B));
impl_into_native_fn!((O A), (B B));
impl_into_native_fn!((B A), (O B));
impl_into_native_fn!((B A), (B B));
impl_into_native_fn!((O A), (O B), (O C));
impl_into_native_fn!((O A), (O B), (B C));
impl_into_native_fn!((O A), (B B), (O C));
impl_into_native_fn!((B A), (O B), (O C));
impl_into_native_fn!((O A), (B B), (B C));
impl_into_native_fn!((B A), (O B), (B C));
impl_into_native_fn!((B A), (B B), (O C));
impl_into_native_fn!((B A), (B B), (B C));

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap<M>(f: impl IntoNativeFn<M>) -> AnyFunction {
        f.into_any_function()
    }

    #[test]
    fn owned_params() {
        let f = wrap(|x: i32, y: i32| x + y);
        assert_eq!(vec![false, false], f.borrows().to_vec());
        let out = f.invoke(vec![Any::cloneable(2i32), Any::cloneable(3i32)], &[]);
        assert_eq!(5, out.into_iter().next().unwrap().downcast::<i32>().ok().unwrap());
    }

    #[test]
    fn borrowed_params() {
        let f = wrap(|x: &i32, y: &i32| x + y);
        assert_eq!(vec![true, true], f.borrows().to_vec());
        let (a, b) = (Any::cloneable(2i32), Any::cloneable(3i32));
        let out = f.invoke(vec![], &[&a, &b]);
        assert_eq!(5, out.into_iter().next().unwrap().downcast::<i32>().ok().unwrap());
    }

    #[test]
    fn mixed_params() {
        let f = wrap(|x: i32, y: &i32| x * y);
        assert_eq!(vec![false, true], f.borrows().to_vec());
        let b = Any::cloneable(4i32);
        let out = f.invoke(vec![Any::cloneable(3i32)], &[&b]);
        assert_eq!(12, out.into_iter().next().unwrap().downcast::<i32>().ok().unwrap());
    }

    #[test]
    fn unit_result_has_no_outputs() {
        let f = wrap(|_: i32| ());
        assert_eq!(0, f.output_count());
        assert!(f.invoke(vec![Any::cloneable(1i32)], &[]).is_empty());
    }

    #[test]
    fn signature_reports_types() {
        fn sig<M, F: IntoNativeFn<M>>(_: F) -> NativeSignature {
            F::signature()
        }
        let s = sig(|_: &String| 1i32);
        assert_eq!(vec![(TypeId::of::<String>(), true)], s.params);
        assert_eq!(Some(TypeId::of::<i32>()), s.output);
    }
}
