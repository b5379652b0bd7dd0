//! Handler adapters
//!
//! Closures with typed parameters become injectable handlers through
//! [`InjectableFn`] and [`CommandFn`]; their parameter list is derived from the
//! closure signature, so every parameter is typed by construction. Handlers
//! that need to declare their parameters by hand use [`DynHandler`].

use super::{build_plan, Inject, InjectionPlan, ParamSpec, ProviderMap, Resolved};
use crate::error::{HandlerError, HandlerResult, RegistrationError};
use crate::transport::BoxFuture;
use crate::State;
use std::future::Future;
use std::sync::Arc;

/// Type-erased handler body taking resolved arguments
pub type ErasedFn<Out> = Arc<dyn Fn(Resolved) -> BoxFuture<'static, HandlerResult<Out>> + Send + Sync>;

/// Type-erased command body taking `(topic, payload)` and resolved arguments
pub type ErasedCommand = Arc<
    dyn Fn(String, String, Resolved) -> BoxFuture<'static, HandlerResult<Option<State>>>
        + Send
        + Sync,
>;

/// Parameter slots a command handler receives from the MQTT message itself
pub const COMMAND_SLOTS: [&str; 2] = ["topic", "payload"];

/// A handler whose parameters are resolved from a [`ProviderMap`]
pub trait InjectableFn<Args, Out>: Send + Sync + 'static {
    fn params(&self) -> Vec<ParamSpec>;
    fn into_erased(self) -> ErasedFn<Out>;
}

/// A command handler: `(topic, payload, injected...) -> Option<State>`
pub trait CommandFn<Args>: Send + Sync + 'static {
    fn params(&self) -> Vec<ParamSpec>;
    fn into_erased(self) -> ErasedCommand;
}

fn arg_name(index: usize) -> String {
    format!("arg{index}")
}

macro_rules! impl_handler_traits {
    ($($ty:ident),*) => {
        impl<F, Fut, Out, $($ty,)*> InjectableFn<($($ty,)*), Out> for F
        where
            F: Fn($($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = HandlerResult<Out>> + Send + 'static,
            Out: Send + 'static,
            $($ty: Inject,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn params(&self) -> Vec<ParamSpec> {
                let mut index = 0usize;
                let mut params = Vec::new();
                $(
                    params.push(ParamSpec::typed::<$ty>(arg_name(index)));
                    index += 1;
                )*
                params
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_erased(self) -> ErasedFn<Out> {
                Arc::new(move |mut args: Resolved| -> BoxFuture<'static, HandlerResult<Out>> {
                    $(
                        let $ty = match args.next::<$ty>() {
                            Ok(value) => value,
                            Err(e) => {
                                return Box::pin(async move { Err::<Out, HandlerError>(e.into()) })
                            }
                        };
                    )*
                    Box::pin((self)($($ty),*))
                })
            }
        }

        impl<F, Fut, $($ty,)*> CommandFn<($($ty,)*)> for F
        where
            F: Fn(String, String, $($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = HandlerResult<Option<State>>> + Send + 'static,
            $($ty: Inject,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn params(&self) -> Vec<ParamSpec> {
                let mut index = 0usize;
                let mut params = vec![
                    ParamSpec::untyped(COMMAND_SLOTS[0]),
                    ParamSpec::untyped(COMMAND_SLOTS[1]),
                ];
                $(
                    params.push(ParamSpec::typed::<$ty>(arg_name(index)));
                    index += 1;
                )*
                params
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn into_erased(self) -> ErasedCommand {
                Arc::new(
                    move |topic: String,
                          payload: String,
                          mut args: Resolved|
                          -> BoxFuture<'static, HandlerResult<Option<State>>> {
                        $(
                            let $ty = match args.next::<$ty>() {
                                Ok(value) => value,
                                Err(e) => {
                                    return Box::pin(async move {
                                        Err::<Option<State>, HandlerError>(e.into())
                                    })
                                }
                            };
                        )*
                        Box::pin((self)(topic, payload, $($ty),*))
                    },
                )
            }
        }
    };
}

impl_handler_traits!();
impl_handler_traits!(T1);
impl_handler_traits!(T1, T2);
impl_handler_traits!(T1, T2, T3);
impl_handler_traits!(T1, T2, T3, T4);
impl_handler_traits!(T1, T2, T3, T4, T5);
impl_handler_traits!(T1, T2, T3, T4, T5, T6);
impl_handler_traits!(T1, T2, T3, T4, T5, T6, T7);
impl_handler_traits!(T1, T2, T3, T4, T5, T6, T7, T8);

/// Marker for [`DynHandler`]'s argument list
pub struct Declared;

/// Handler with a hand-written parameter list.
///
/// The body pulls its arguments from [`Resolved`] in declaration order.
pub struct DynHandler<Out> {
    params: Vec<ParamSpec>,
    func: ErasedFn<Out>,
}

impl<Out: Send + 'static> DynHandler<Out> {
    pub fn new<F, Fut>(params: Vec<ParamSpec>, func: F) -> Self
    where
        F: Fn(Resolved) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Out>> + Send + 'static,
    {
        Self {
            params,
            func: Arc::new(move |args: Resolved| -> BoxFuture<'static, HandlerResult<Out>> {
                Box::pin(func(args))
            }),
        }
    }
}

impl<Out: Send + 'static> InjectableFn<Declared, Out> for DynHandler<Out> {
    fn params(&self) -> Vec<ParamSpec> {
        self.params.clone()
    }

    fn into_erased(self) -> ErasedFn<Out> {
        self.func
    }
}

/// Handler with its checked plan
pub struct Injected<Out> {
    plan: InjectionPlan,
    func: ErasedFn<Out>,
}

impl<Out> Clone for Injected<Out> {
    fn clone(&self) -> Self {
        Self {
            plan: self.plan.clone(),
            func: self.func.clone(),
        }
    }
}

impl<Out: Send + 'static> Injected<Out> {
    /// Check the handler's parameters and capture its plan
    pub fn prepare<Args, H>(name: &str, handler: H) -> Result<Self, RegistrationError>
    where
        H: InjectableFn<Args, Out>,
    {
        let plan = build_plan(name, &handler.params(), &[])?;
        Ok(Self {
            plan,
            func: handler.into_erased(),
        })
    }

    pub fn plan(&self) -> &InjectionPlan {
        &self.plan
    }

    /// Resolve arguments and run the handler
    pub async fn invoke(&self, providers: &ProviderMap) -> HandlerResult<Out> {
        let args = providers.resolve(&self.plan)?;
        (self.func)(args).await
    }
}

/// Command handler with its checked plan
#[derive(Clone)]
pub struct InjectedCommand {
    plan: InjectionPlan,
    func: ErasedCommand,
}

impl InjectedCommand {
    pub fn prepare<Args, H>(name: &str, handler: H) -> Result<Self, RegistrationError>
    where
        H: CommandFn<Args>,
    {
        let plan = build_plan(name, &handler.params(), &COMMAND_SLOTS)?;
        Ok(Self {
            plan,
            func: handler.into_erased(),
        })
    }

    pub fn plan(&self) -> &InjectionPlan {
        &self.plan
    }

    pub async fn invoke(
        &self,
        topic: String,
        payload: String,
        providers: &ProviderMap,
    ) -> HandlerResult<Option<State>> {
        let args = providers.resolve(&self.plan)?;
        (self.func)(topic, payload, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InjectionError;
    use crate::injection::{ParamKind, TypeKey};
    use serde_json::json;

    fn providers() -> ProviderMap {
        let mut providers = ProviderMap::new();
        providers.insert(21.5f64);
        providers.insert("kitchen".to_string());
        providers
    }

    #[tokio::test]
    async fn test_zero_arg_handler() {
        let handler = Injected::prepare("noop", || async { Ok(()) }).unwrap();
        assert!(handler.plan().is_empty());
        handler.invoke(&ProviderMap::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_typed_closure_receives_providers() {
        let handler = Injected::prepare("read", |value: f64, room: String| async move {
            let mut state = State::new();
            state.insert(room, json!(value));
            Ok(state)
        })
        .unwrap();

        let plan: Vec<TypeKey> = handler.plan().entries().iter().map(|(_, t)| *t).collect();
        assert_eq!(plan, vec![TypeKey::of::<f64>(), TypeKey::of::<String>()]);

        let state = handler.invoke(&providers()).await.unwrap();
        assert_eq!(state.get("kitchen"), Some(&json!(21.5)));
    }

    #[tokio::test]
    async fn test_missing_provider_surfaces_as_handler_error() {
        let handler = Injected::prepare("needs_u32", |_n: u32| async { Ok(()) }).unwrap();
        let err = handler.invoke(&providers()).await.unwrap_err();
        let injection = err
            .downcast_ref::<InjectionError>()
            .expect("injection error");
        assert!(matches!(injection, InjectionError::UnresolvedType { .. }));
    }

    #[tokio::test]
    async fn test_command_handler_gets_topic_and_payload() {
        let handler = InjectedCommand::prepare(
            "relay",
            |topic: String, payload: String, room: String| async move {
                let mut state = State::new();
                state.insert("topic".to_string(), json!(topic));
                state.insert("payload".to_string(), json!(payload));
                state.insert("room".to_string(), json!(room));
                Ok(Some(state))
            },
        )
        .unwrap();
        assert_eq!(handler.plan().len(), 1);

        let state = handler
            .invoke("home/relay/set".to_string(), "ON".to_string(), &providers())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["topic"], json!("home/relay/set"));
        assert_eq!(state["payload"], json!("ON"));
        assert_eq!(state["room"], json!("kitchen"));
    }

    #[tokio::test]
    async fn test_dyn_handler_declared_params() {
        let handler = DynHandler::new(
            vec![ParamSpec::typed::<String>("room")],
            |mut args: Resolved| async move {
                let room = args.next::<String>()?;
                Ok::<_, HandlerError>(room.len())
            },
        );
        let handler = Injected::prepare("dyn", handler).unwrap();
        assert_eq!(handler.invoke(&providers()).await.unwrap(), 7);
    }

    #[test]
    fn test_dyn_handler_untyped_rejected() {
        let handler = DynHandler::new(vec![ParamSpec::untyped("thing")], |_args| async {
            Ok(())
        });
        let err = Injected::prepare("dyn", handler).err().unwrap();
        assert!(matches!(err, RegistrationError::UntypedParameter { .. }));
    }

    #[test]
    fn test_dyn_handler_variadic_rejected() {
        let handler = DynHandler::new(
            vec![ParamSpec::typed::<String>("rest").with_kind(ParamKind::Variadic)],
            |_args| async { Ok(()) },
        );
        let err = Injected::prepare("dyn", handler).err().unwrap();
        assert!(matches!(
            err,
            RegistrationError::UnsupportedParameterKind { .. }
        ));
    }
}
