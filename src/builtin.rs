//! Construction of the four dictionaries installed at engine start:
//! `systemdict` with every operator and predefined name, `errordict` with
//! the default handler for every error name, `$error`, and `userdict`.

use crate::{
    error::ErrorKind,
    interpreter::Interpreter,
    object::{Object, PsString, Value},
    operator::{Operator, REGISTRY},
};

pub(crate) fn install(interp: &mut Interpreter) {
    let systemdict = interp.systemdict;

    for &(name, op) in REGISTRY {
        interp
            .vm
            .dict_payload_mut(systemdict)
            .map
            .insert(PsString::from_str(name), Object::executable(Value::Operator(op)));
    }

    for (name, dict) in [
        ("systemdict", interp.systemdict),
        ("userdict", interp.userdict),
        ("errordict", interp.errordict),
        ("$error", interp.dollar_error),
    ] {
        interp
            .vm
            .dict_payload_mut(systemdict)
            .map
            .insert(PsString::from_str(name), Object::literal(Value::Dict(dict)));
    }

    // Every error name gets the standard handler: a procedure that pushes
    // the error's own name and records the failure via `.error`.
    for kind in ErrorKind::ALL {
        let body = vec![
            Object::literal(Value::Name(PsString::from_str(kind.name()))),
            Object::executable(Value::Operator(Operator::ErrorDefault)),
        ];
        let arr = interp.vm.new_array(body);
        interp
            .vm
            .dict_payload_mut(interp.errordict)
            .map
            .insert(PsString::from_str(kind.name()), Object::executable(Value::Array(arr)));
    }

    let errord = interp.dollar_error;
    for (key, value) in [
        ("newerror", Object::from(false)),
        ("errorname", Object::null()),
        ("command", Object::null()),
    ] {
        interp
            .vm
            .dict_payload_mut(errord)
            .map
            .insert(PsString::from_str(key), value);
    }

    interp.set_argv(&[]);
}
