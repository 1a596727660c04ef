use crate::stage::StageKind;

/// An ordered sequence of stage identifiers, selected by name from a closed
/// catalog. The engine appends `Finish` if a pipeline's last effective step
/// isn't already the terminal marker.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    pub description: &'static str,
    pub stages: Vec<StageKind>,
}

impl Pipeline {
    /// Stage list with the terminal `Finish` marker appended if missing.
    pub fn stages_with_terminal(&self) -> Vec<StageKind> {
        let mut stages = self.stages.clone();
        if stages.last() != Some(&StageKind::Finish) {
            stages.push(StageKind::Finish);
        }
        stages
    }
}

macro_rules! pipeline {
    ($name:literal, $description:literal, [$($stage:ident),* $(,)?]) => {
        Pipeline {
            name: $name.to_string(),
            description: $description,
            stages: vec![$(StageKind::$stage),*],
        }
    };
}

/// The static, named pipeline catalog.
pub fn catalog() -> Vec<Pipeline> {
    vec![
        pipeline!(
            "all",
            "full cycle deployment: from making deploying files up to pushing to Docker Hub",
            [MakeFiles, DeleteImage, BuildImage, TestImage, PushImage, DeleteKubernetes, DeployKubernetes, TestKubernetes, PushToDockerHub]
        ),
        pipeline!(
            "all_up_kuber",
            "full cycle deployment without pushing to Docker Hub",
            [MakeFiles, DeleteImage, BuildImage, TestImage, PushImage, DeleteKubernetes, DeployKubernetes, TestKubernetes]
        ),
        pipeline!(
            "all_up_kuber_no_tests",
            "full cycle deployment without pushing to Docker Hub without tests",
            [MakeFiles, DeleteImage, BuildImage, PushImage, DeleteKubernetes, DeployKubernetes]
        ),
        pipeline!(
            "all_up_docker",
            "build, test and tag images without deploying to Kubernetes",
            [MakeFiles, DeleteImage, BuildImage, TestImage]
        ),
        pipeline!(
            "all_up_docker_no_tests",
            "build images without deploying to Kubernetes and without tests",
            [MakeFiles, DeleteImage, BuildImage]
        ),
        pipeline!(
            "all_from_docker",
            "full cycle deployment without making deployment files",
            [DeleteImage, BuildImage, TestImage, PushImage, DeleteKubernetes, DeployKubernetes, TestKubernetes, PushToDockerHub]
        ),
        pipeline!(
            "from_docker_up_kuber",
            "deployment cycle from building images up to deploying in Kubernetes",
            [DeleteImage, BuildImage, TestImage, PushImage, DeleteKubernetes, DeployKubernetes, TestKubernetes]
        ),
        pipeline!("make_files", "make deployment files", [MakeFiles]),
        pipeline!(
            "build_docker",
            "build and test images",
            [DeleteImage, BuildImage, TestImage]
        ),
        pipeline!(
            "build_docker_no_tests",
            "build images without tests",
            [DeleteImage, BuildImage]
        ),
        pipeline!(
            "make_files_and_docker_no_tests",
            "make files and build images without tests",
            [MakeFiles, DeleteImage, BuildImage]
        ),
        pipeline!("delete_docker", "delete docker images", [DeleteImage]),
        pipeline!("test_docker", "test docker images", [TestImage]),
        pipeline!(
            "create_kuber",
            "deploy in Kubernetes and test",
            [DeleteKubernetes, DeployKubernetes, TestKubernetes]
        ),
        pipeline!(
            "create_kuber_no_tests",
            "deploy in Kubernetes without test",
            [DeleteKubernetes, DeployKubernetes]
        ),
        pipeline!(
            "make_files_and_kuber_no_tests",
            "make files and deploy in Kubernetes without test",
            [MakeFiles, DeleteKubernetes, DeployKubernetes]
        ),
        pipeline!("delete_kuber", "delete Kubernetes deployment", [DeleteKubernetes]),
        pipeline!("test_kuber", "test Kubernetes deployment", [TestKubernetes]),
        pipeline!("push_to_registry", "push images to local registry", [PushImage]),
        pipeline!("pull_from_registry", "pull images from local registry", [PullImage]),
        pipeline!("push_to_docker_hub", "push images to Docker Hub", [PushToDockerHub]),
    ]
}

/// Look up a pipeline by name in the catalog.
pub fn lookup(name: &str) -> Option<Pipeline> {
    catalog().into_iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_twenty_one_entries() {
        assert_eq!(catalog().len(), 21);
    }

    #[test]
    fn every_stage_identifier_is_implemented() {
        // the catalog is a pure data structure; every referenced stage
        // identifier must be a variant of StageKind (compile-time enforced
        // by the macro, exercised here at runtime too).
        for pipeline in catalog() {
            assert!(!pipeline.stages.is_empty());
        }
    }

    #[test]
    fn lookup_finds_known_pipeline() {
        let p = lookup("delete_kuber").unwrap();
        assert_eq!(p.stages, vec![StageKind::DeleteKubernetes]);
    }

    #[test]
    fn lookup_misses_unknown_pipeline() {
        assert!(lookup("does_not_exist").is_none());
    }

    #[test]
    fn stages_with_terminal_appends_finish_once() {
        let p = lookup("make_files").unwrap();
        let stages = p.stages_with_terminal();
        assert_eq!(stages, vec![StageKind::MakeFiles, StageKind::Finish]);

        let all = lookup("all").unwrap();
        let all_stages = all.stages_with_terminal();
        assert_eq!(all_stages.last(), Some(&StageKind::Finish));
        assert_eq!(
            all_stages.iter().filter(|s| **s == StageKind::Finish).count(),
            1
        );
    }
}
