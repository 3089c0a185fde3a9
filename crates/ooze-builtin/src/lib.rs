#![deny(unreachable_pub)]

use ooze_core::Env;

/// An environment with no registered types or functions.
pub fn create_empty_env() -> Env {
    Env::new()
}

macro_rules! register_primitive {
    ($env:ident, $T:ty, $name:literal) => {
        $env.add_type::<$T>($name);
        $env.add_function::<(String, ooze_core::native::Borrowed<$T>), _>(
            "to_string",
            |x: &$T| x.to_string(),
        );
    };
}

/// An environment with every primitive leaf type registered, each with
/// `clone` and `to_string` overloads. Scalars are copy-registered;
/// `string` is move-only so it is never copied implicitly, but it can
/// still be cloned and rendered explicitly.
pub fn create_primitive_env() -> Env {
    let mut env = Env::new();

    register_primitive!(env, i8, "i8");
    register_primitive!(env, i16, "i16");
    register_primitive!(env, i32, "i32");
    register_primitive!(env, i64, "i64");
    register_primitive!(env, u8, "u8");
    register_primitive!(env, u16, "u16");
    register_primitive!(env, u32, "u32");
    register_primitive!(env, u64, "u64");
    register_primitive!(env, f32, "f32");
    register_primitive!(env, f64, "f64");
    register_primitive!(env, bool, "bool");

    env.add_move_type::<String>("string");
    env.add_function::<(String, ooze_core::native::Borrowed<String>), _>(
        "clone",
        |x: &String| x.clone(),
    );
    env.add_function::<(String, ooze_core::native::Borrowed<String>), _>(
        "to_string",
        |x: &String| x.to_string(),
    );

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_env_registers_types() {
        let env = create_primitive_env();
        let names = env.native_types().names.clone();
        for name in [
            "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64", "bool", "string",
        ] {
            assert!(names.contains_key(name), "missing {}", name);
        }
    }

    #[test]
    fn primitives_have_to_string() {
        let env = create_primitive_env();
        assert!(env.to_string_resolves(std::any::TypeId::of::<i32>()));
        assert!(env.to_string_resolves(std::any::TypeId::of::<String>()));
    }

    #[test]
    fn empty_env_has_no_globals() {
        let env = create_empty_env();
        assert!(env.globals().is_empty());
    }
}
