//! Pluggable script evaluation for transform, switch, and filter expressions.
//!
//! Scripts are trusted configuration: the Lua evaluator is not a security
//! boundary, it only keeps user expressions out of the engine's address
//! space conventions. The trait exists so a real sandbox can be substituted
//! without touching the node implementations.

use mlua::{Lua, LuaSerdeExt};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Errors from script evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    /// What went wrong, as reported by the evaluator.
    pub message: String,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script evaluation failed: {}", self.message)
    }
}

impl std::error::Error for ScriptError {}

impl From<mlua::Error> for ScriptError {
    fn from(e: mlua::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

/// Evaluates configured scripts over named JSON globals.
pub trait ScriptEngine: Send + Sync {
    /// Evaluates a script with the given globals bound, returning its result
    /// as JSON.
    fn eval(&self, script: &str, globals: &Map<String, JsonValue>)
    -> Result<JsonValue, ScriptError>;

    /// Evaluates a predicate expression with `data` bound, using the
    /// language's truthiness rules.
    fn eval_predicate(&self, expr: &str, data: &JsonValue) -> Result<bool, ScriptError>;
}

/// Lua-backed script engine. A fresh interpreter is created per evaluation so
/// scripts cannot leak state into each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct LuaScriptEngine;

impl ScriptEngine for LuaScriptEngine {
    fn eval(
        &self,
        script: &str,
        globals: &Map<String, JsonValue>,
    ) -> Result<JsonValue, ScriptError> {
        let lua = Lua::new();
        let table = lua.globals();
        for (name, value) in globals {
            table.set(name.as_str(), lua.to_value(value)?)?;
        }
        let result: mlua::Value = lua.load(script).eval()?;
        Ok(lua.from_value(result)?)
    }

    fn eval_predicate(&self, expr: &str, data: &JsonValue) -> Result<bool, ScriptError> {
        let lua = Lua::new();
        lua.globals().set("data", lua.to_value(data)?)?;
        let result: mlua::Value = lua.load(expr).eval()?;
        Ok(match result {
            mlua::Value::Nil => false,
            mlua::Value::Boolean(value) => value,
            _ => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globals(pairs: &[(&str, JsonValue)]) -> Map<String, JsonValue> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn eval_arithmetic_over_globals() {
        let engine = LuaScriptEngine;
        let result = engine
            .eval(
                "return source.x * 2",
                &globals(&[("source", serde_json::json!({"x": 3}))]),
            )
            .expect("eval");
        assert_eq!(result, serde_json::json!(6));
    }

    #[test]
    fn eval_returns_structured_values() {
        let engine = LuaScriptEngine;
        let result = engine
            .eval(
                "return { doubled = source * 2, tag = 'ok' }",
                &globals(&[("source", serde_json::json!(21))]),
            )
            .expect("eval");
        assert_eq!(result["doubled"], 42);
        assert_eq!(result["tag"], "ok");
    }

    #[test]
    fn eval_reads_variables() {
        let engine = LuaScriptEngine;
        let result = engine
            .eval(
                "return variables.greeting .. ' world'",
                &globals(&[("variables", serde_json::json!({"greeting": "hello"}))]),
            )
            .expect("eval");
        assert_eq!(result, serde_json::json!("hello world"));
    }

    #[test]
    fn eval_surfaces_script_errors() {
        let engine = LuaScriptEngine;
        let err = engine
            .eval("error('boom')", &Map::new())
            .expect_err("should fail");
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn eval_surfaces_syntax_errors() {
        let engine = LuaScriptEngine;
        assert!(engine.eval("return ((", &Map::new()).is_err());
    }

    #[test]
    fn predicate_truthiness() {
        let engine = LuaScriptEngine;
        assert!(
            engine
                .eval_predicate("return data > 3", &serde_json::json!(5))
                .expect("eval")
        );
        assert!(
            !engine
                .eval_predicate("return data > 3", &serde_json::json!(1))
                .expect("eval")
        );
        // Lua truthiness: any non-nil, non-false value passes.
        assert!(
            engine
                .eval_predicate("return 'anything'", &JsonValue::Null)
                .expect("eval")
        );
        assert!(
            !engine
                .eval_predicate("return nil", &JsonValue::Null)
                .expect("eval")
        );
    }

    #[test]
    fn interpreters_do_not_share_state() {
        let engine = LuaScriptEngine;
        engine
            .eval("leak = 42 return leak", &Map::new())
            .expect("eval");
        let result = engine.eval("return leak", &Map::new()).expect("eval");
        assert_eq!(result, JsonValue::Null);
    }
}
