//! The sidecar injector itself: inspect the pod, mint a credential, attach
//! the sidecar.

use chrono::Utc;
use k8s_openapi::api::core::v1::{Capabilities, Container, EnvVar, Pod, SecurityContext};
use tracing::info;
use tsinject_headscale::preauthkeys::PreAuthKeysApi;

use crate::{
    config::{self, InjectorSettings, MutationConfig},
    error::{MutationError, Result},
};

pub const SIDECAR_NAME: &str = "tailscale";

/// How long a freshly minted pre-auth key stays valid. The sidecar joins
/// the mesh right after the pod is scheduled, so minutes are plenty.
const PRE_AUTH_KEY_TTL_MINUTES: i64 = 2;

/// Mutates admitted pods by prepending a tailscale sidecar to their init
/// containers.
///
/// Holds only immutable state, so one injector serves any number of
/// concurrent mutation calls.
#[derive(Debug)]
pub struct SidecarInjector<K> {
    issuer: K,
    settings: InjectorSettings,
}

impl<K: PreAuthKeysApi> SidecarInjector<K> {
    pub fn new(issuer: K, settings: InjectorSettings) -> Self {
        SidecarInjector { issuer, settings }
    }

    /// Mutation entry point.
    ///
    /// Pods without the [`config::INJECT_LABEL`] label pass through: the
    /// result is deeply equal to the input and no remote call is made. For
    /// the rest, the result is a fresh copy of `pod` with the tailscale
    /// sidecar prepended to its init containers. `pod` itself is never
    /// modified, so the caller keeps a pristine value even on error.
    #[tracing::instrument(level = "trace", skip_all, fields(pod = pod.metadata.name.as_deref().unwrap_or_default()))]
    pub async fn mutate(&self, pod: &Pod) -> Result<Pod> {
        if !config::wants_injection(pod) {
            info!(
                pod = pod.metadata.name.as_deref().unwrap_or_default(),
                "ignoring pod without inject label",
            );
            return Ok(pod.clone());
        }

        let mutation_config = MutationConfig::resolve(pod, &self.settings);

        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let auth_key = self
            .acquire_auth_key(&mutation_config, &[namespace, "pod"])
            .await?;

        let sidecar = build_sidecar_container(&mutation_config, &auth_key);

        let mut mutated = pod.clone();
        inject_sidecar(&mut mutated, Some(sidecar))?;

        Ok(mutated)
    }

    /// Reuses the statically configured key when present, otherwise mints a
    /// single-use ephemeral key tagged for this pod.
    async fn acquire_auth_key(&self, config: &MutationConfig, tags: &[&str]) -> Result<String> {
        if let Some(key) = &config.pre_auth_key {
            return Ok(key.clone());
        }

        let acl_tags = tags.iter().map(|tag| format!("tag:{tag}")).collect();
        let expiration = Utc::now() + chrono::Duration::minutes(PRE_AUTH_KEY_TTL_MINUTES);

        let key = self
            .issuer
            .create_pre_auth_key(&config.user, false, true, expiration, acl_tags)
            .await?;

        Ok(key.key)
    }
}

/// Builds the tailscale sidecar container spec. Pure function of the
/// resolved configuration and the issued key.
fn build_sidecar_container(config: &MutationConfig, auth_key: &str) -> Container {
    Container {
        name: SIDECAR_NAME.to_string(),
        image: Some(config.image.clone()),
        image_pull_policy: Some("Always".to_string()),
        // Restarting independently of the workload keeps the mesh agent
        // alive for the pod's whole lifetime (native sidecar).
        restart_policy: Some("Always".to_string()),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            capabilities: Some(Capabilities {
                // Required to manage the tun interface.
                add: Some(vec!["NET_ADMIN".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        env: Some(vec![
            EnvVar {
                name: config::SECRET_NAME_KEY.to_string(),
                value: Some(config.secret_name.clone()),
                ..Default::default()
            },
            EnvVar {
                name: config::USERSPACE_KEY.to_string(),
                value: Some(config.userspace_value().to_string()),
                ..Default::default()
            },
            EnvVar {
                name: config::EXTRA_ARGS_KEY.to_string(),
                value: Some(config.extra_args.join(" ")),
                ..Default::default()
            },
            EnvVar {
                name: config::PRE_AUTH_KEY_KEY.to_string(),
                value: Some(auth_key.to_string()),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

/// Prepends `sidecar` to the pod's init containers.
fn inject_sidecar(pod: &mut Pod, sidecar: Option<Container>) -> Result<()> {
    let sidecar = sidecar.ok_or(MutationError::EmptySidecar)?;
    let spec = pod.spec.as_mut().ok_or(MutationError::PodSpecMissing)?;

    spec.init_containers.get_or_insert_with(Vec::new).insert(0, sidecar);

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        future::Future,
        sync::Mutex,
    };

    use chrono::{DateTime, Utc};
    use k8s_openapi::{
        api::core::v1::PodSpec,
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };
    use reqwest::StatusCode;
    use rstest::rstest;
    use tsinject_headscale::{
        error::ApiOperation, preauthkeys::PreAuthKey, HeadscaleApiError,
    };

    use super::*;

    const ISSUED_KEY: &str = "7b85ab8c220a7e1c4f1f0c93a2c8e0e21c0e7b70a92cfbcd";

    #[derive(Debug, Clone, PartialEq)]
    struct CreateCall {
        user: String,
        reusable: bool,
        ephemeral: bool,
        expiration: DateTime<Utc>,
        acl_tags: Vec<String>,
    }

    /// Test double for the credential issuer.
    #[derive(Default)]
    struct StubIssuer {
        fail_with_status: Option<u16>,
        calls: Mutex<Vec<CreateCall>>,
    }

    impl StubIssuer {
        fn failing(status: u16) -> Self {
            StubIssuer {
                fail_with_status: Some(status),
                ..Default::default()
            }
        }

        fn create_calls(&self) -> Vec<CreateCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PreAuthKeysApi for &StubIssuer {
        fn create_pre_auth_key(
            &self,
            user: &str,
            reusable: bool,
            ephemeral: bool,
            expiration: DateTime<Utc>,
            acl_tags: Vec<String>,
        ) -> impl Future<Output = tsinject_headscale::Result<PreAuthKey>> + Send {
            self.calls.lock().unwrap().push(CreateCall {
                user: user.to_string(),
                reusable,
                ephemeral,
                expiration,
                acl_tags: acl_tags.clone(),
            });

            let result = match self.fail_with_status {
                Some(status) => Err(HeadscaleApiError::UnexpectedStatus {
                    operation: ApiOperation::CreatePreAuthKey,
                    status: StatusCode::from_u16(status).unwrap(),
                    body: String::new(),
                }),
                None => Ok(PreAuthKey {
                    user: user.to_string(),
                    id: "7".to_string(),
                    key: ISSUED_KEY.to_string(),
                    reusable,
                    ephemeral,
                    used: false,
                    expiration,
                    created_at: Utc::now(),
                    acl_tags,
                }),
            };

            async move { result }
        }

        fn list_pre_auth_keys(
            &self,
            _user: &str,
        ) -> impl Future<Output = tsinject_headscale::Result<Vec<PreAuthKey>>> + Send {
            async move { Ok(vec![]) }
        }

        fn expire_pre_auth_key(
            &self,
            _user: &str,
            _key: &str,
        ) -> impl Future<Output = tsinject_headscale::Result<()>> + Send {
            async move { Ok(()) }
        }
    }

    fn labeled_pod(namespace: &str, annotations: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("test".to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(
                    [(config::INJECT_LABEL.to_string(), String::new())]
                        .into_iter()
                        .collect::<BTreeMap<_, _>>(),
                ),
                annotations: (!annotations.is_empty()).then(|| {
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>()
                }),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "workload".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn plain_pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("test".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "workload".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn env_value<'c>(container: &'c Container, name: &str) -> Option<&'c str> {
        container
            .env
            .as_ref()?
            .iter()
            .find(|env| env.name == name)?
            .value
            .as_deref()
    }

    #[tokio::test]
    async fn unlabeled_pod_passes_through_untouched() {
        let issuer = StubIssuer::default();
        let injector = SidecarInjector::new(&issuer, InjectorSettings::default());
        let pod = plain_pod();
        let snapshot = pod.clone();

        let mutated = injector.mutate(&pod).await.unwrap();

        assert_eq!(mutated, snapshot);
        assert_eq!(pod, snapshot);
        assert!(issuer.create_calls().is_empty());
    }

    #[tokio::test]
    async fn labeled_pod_gets_the_sidecar_prepended() {
        let issuer = StubIssuer::default();
        let injector = SidecarInjector::new(&issuer, InjectorSettings::default());
        let pod = labeled_pod("prod", &[]);
        let snapshot = pod.clone();

        let mutated = injector.mutate(&pod).await.unwrap();

        // The input pod is untouched.
        assert_eq!(pod, snapshot);

        let init_containers = mutated.spec.as_ref().unwrap().init_containers.as_ref().unwrap();
        assert_eq!(init_containers.len(), 1);

        let sidecar = init_containers.first().unwrap();
        assert_eq!(sidecar.name, SIDECAR_NAME);
        assert_eq!(sidecar.image.as_deref(), Some(config::IMAGE));
        assert_eq!(sidecar.image_pull_policy.as_deref(), Some("Always"));
        assert_eq!(sidecar.restart_policy.as_deref(), Some("Always"));
        assert_eq!(env_value(sidecar, config::PRE_AUTH_KEY_KEY), Some(ISSUED_KEY));
        assert_eq!(
            env_value(sidecar, config::SECRET_NAME_KEY),
            Some(config::DEFAULT_SECRET_NAME),
        );
        assert_eq!(env_value(sidecar, config::USERSPACE_KEY), Some("false"));
        assert_eq!(env_value(sidecar, config::EXTRA_ARGS_KEY), Some(""));

        // Everything else about the pod is identical.
        let mut without_sidecar = mutated.clone();
        without_sidecar.spec.as_mut().unwrap().init_containers = None;
        assert_eq!(without_sidecar, snapshot);
    }

    #[tokio::test]
    async fn sidecar_requests_net_admin() {
        let issuer = StubIssuer::default();
        let injector = SidecarInjector::new(&issuer, InjectorSettings::default());

        let mutated = injector.mutate(&labeled_pod("prod", &[])).await.unwrap();

        let sidecar = mutated.spec.unwrap().init_containers.unwrap().remove(0);
        let security_context = sidecar.security_context.unwrap();
        assert_eq!(security_context.privileged, Some(true));
        assert_eq!(
            security_context.capabilities.unwrap().add.unwrap(),
            vec!["NET_ADMIN".to_string()],
        );
    }

    #[tokio::test]
    async fn existing_init_containers_keep_their_order() {
        let issuer = StubIssuer::default();
        let injector = SidecarInjector::new(&issuer, InjectorSettings::default());
        let mut pod = labeled_pod("prod", &[]);
        pod.spec.as_mut().unwrap().init_containers = Some(vec![
            Container {
                name: "first".to_string(),
                ..Default::default()
            },
            Container {
                name: "second".to_string(),
                ..Default::default()
            },
        ]);

        let mutated = injector.mutate(&pod).await.unwrap();

        let names: Vec<&str> = mutated
            .spec
            .as_ref()
            .unwrap()
            .init_containers
            .as_ref()
            .unwrap()
            .iter()
            .map(|container| container.name.as_str())
            .collect();
        assert_eq!(names, vec![SIDECAR_NAME, "first", "second"]);
    }

    #[tokio::test]
    async fn ephemeral_key_is_minted_with_pod_tags() {
        let issuer = StubIssuer::default();
        let injector = SidecarInjector::new(&issuer, InjectorSettings::default());
        let before = Utc::now();

        injector
            .mutate(&labeled_pod("prod", &[(config::USER_NAME_ANNOTATION, "sammm")]))
            .await
            .unwrap();

        let calls = issuer.create_calls();
        assert_eq!(calls.len(), 1);

        let call = calls.first().unwrap();
        assert_eq!(call.user, "sammm");
        assert!(!call.reusable);
        assert!(call.ephemeral);
        assert_eq!(call.acl_tags, vec!["tag:prod", "tag:pod"]);
        assert!(call.expiration > before);
        assert!(call.expiration <= Utc::now() + chrono::Duration::minutes(PRE_AUTH_KEY_TTL_MINUTES));
    }

    #[tokio::test]
    async fn static_key_skips_the_issuer() {
        let issuer = StubIssuer::default();
        let injector = SidecarInjector::new(
            &issuer,
            InjectorSettings {
                pre_auth_key: Some("static-key".to_string()),
                ..Default::default()
            },
        );

        let mutated = injector.mutate(&labeled_pod("prod", &[])).await.unwrap();

        assert!(issuer.create_calls().is_empty());
        let sidecar = mutated.spec.unwrap().init_containers.unwrap().remove(0);
        assert_eq!(env_value(&sidecar, config::PRE_AUTH_KEY_KEY), Some("static-key"));
    }

    #[tokio::test]
    async fn annotations_shape_the_sidecar_env() {
        let issuer = StubIssuer::default();
        let injector = SidecarInjector::new(&issuer, InjectorSettings::default());
        let pod = labeled_pod(
            "prod",
            &[
                (config::SECRET_NAME_ANNOTATION, "my-secret"),
                (config::ENABLE_USERSPACE_ANNOTATION, "false"),
                (config::LOGIN_SERVER_ANNOTATION, "https://hs.iced.cool"),
            ],
        );

        let mutated = injector.mutate(&pod).await.unwrap();

        let sidecar = mutated.spec.unwrap().init_containers.unwrap().remove(0);
        assert_eq!(env_value(&sidecar, config::SECRET_NAME_KEY), Some("my-secret"));
        // Presence of the annotation wins over its value.
        assert_eq!(env_value(&sidecar, config::USERSPACE_KEY), Some("true"));
        assert_eq!(
            env_value(&sidecar, config::EXTRA_ARGS_KEY),
            Some("--login-server=https://hs.iced.cool"),
        );
    }

    #[tokio::test]
    async fn issuer_failure_aborts_the_mutation() {
        let issuer = StubIssuer::failing(500);
        let injector = SidecarInjector::new(&issuer, InjectorSettings::default());
        let pod = labeled_pod("prod", &[]);
        let snapshot = pod.clone();

        let result = injector.mutate(&pod).await;

        match result {
            Err(MutationError::PreAuthKey(HeadscaleApiError::UnexpectedStatus {
                status, ..
            })) => assert_eq!(status.as_u16(), 500),
            other => panic!("expected a wrapped transport error, got {other:?}"),
        }
        // The caller's pod is untouched by the failed call.
        assert_eq!(pod, snapshot);
    }

    #[tokio::test]
    async fn pod_without_spec_fails_without_partial_mutation() {
        let issuer = StubIssuer::default();
        let injector = SidecarInjector::new(&issuer, InjectorSettings::default());
        let mut pod = labeled_pod("prod", &[]);
        pod.spec = None;
        let snapshot = pod.clone();

        let result = injector.mutate(&pod).await;

        assert!(matches!(result, Err(MutationError::PodSpecMissing)));
        assert_eq!(pod, snapshot);
    }

    #[rstest]
    fn missing_sidecar_is_rejected() {
        let mut pod = plain_pod();

        let result = inject_sidecar(&mut pod, None);

        assert!(matches!(result, Err(MutationError::EmptySidecar)));
        assert_eq!(pod, plain_pod());
    }
}
