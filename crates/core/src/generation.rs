use crate::error::{AssistError, SearchError};
use crate::llm::{with_deadline, CompletionRequest, LanguageModel};
use crate::models::{ArtifactKind, FieldValues, GeneratedArtifact};
use crate::normalizer::{escape_html, normalize_generation, DisclaimerRule, NormalizedBody};
use crate::store::ArtifactStore;
use crate::templates::{find_template, TemplateSpec};
use chrono::Utc;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything that differs between contracts, petitions and statements.
pub struct GenerationProfile {
    pub kind: ArtifactKind,
    /// Lowercase noun used inside prompts, e.g. "contract".
    pub label: &'static str,
    pub system_prompt: &'static str,
    pub drafting_instructions: &'static str,
    pub disclaimer_text: &'static str,
    pub disclaimer_markers: &'static [&'static str],
}

static CONTRACT_PROFILE: GenerationProfile = GenerationProfile {
    kind: ArtifactKind::Contract,
    label: "contract",
    system_prompt: "You are an expert assistant that drafts contracts. Produce a complete, \
well-structured contract from the information provided, formatted as HTML using headings \
(<h1>, <h2>), paragraphs (<p>), lists (<ul>, <ol>, <li>) and emphasis (<strong>, <em>). \
Always end with a disclaimer stating that the draft was generated automatically and must be \
reviewed by a legal professional.",
    drafting_instructions: "Include the usual clauses for this type of contract: full names and \
addresses of the parties, subject matter, rights and obligations, consideration (if any), term, \
termination, notice addresses, jurisdiction and governing law. Add signature blocks for the \
parties.",
    disclaimer_text: "This contract draft was generated automatically and is only an example. \
Consult a legal advisor about its validity and suitability for your situation. You may edit the \
generated text to fit your needs.",
    disclaimer_markers: &["consult a legal advisor"],
};

static PETITION_PROFILE: GenerationProfile = GenerationProfile {
    kind: ArtifactKind::Petition,
    label: "petition",
    system_prompt: "You are an expert assistant that drafts petitions. Produce a complete, formal \
petition from the information provided, formatted as HTML using headings (<h1>, <h2>), \
paragraphs (<p>), lists (<ul>, <ol>, <li>) and emphasis (<strong>, <em>). Always end with a \
disclaimer stating that the draft was generated automatically and must be reviewed by a legal \
professional.",
    drafting_instructions: "Use formal language and the customary layout: the addressed \
authority, the petitioner and respondent, subject, statement of facts, legal grounds, and the \
conclusion and request. Leave room for the date and signature where needed.",
    disclaimer_text: "This petition draft was generated automatically and is only an example. \
Consult a legal advisor about its validity and suitability for your situation. You may edit the \
generated text to fit your needs.",
    disclaimer_markers: &["consult a legal advisor"],
};

static STATEMENT_PROFILE: GenerationProfile = GenerationProfile {
    kind: ArtifactKind::Statement,
    label: "statement",
    system_prompt: "You are an expert assistant that drafts formal statement records. Produce a \
complete, formal statement from the information provided, formatted as HTML using headings \
(<h1>, <h2>), paragraphs (<p>) and emphasis (<strong>, <em>). Always end with a disclaimer \
stating that the draft was generated automatically, must be reviewed by a legal professional \
and must be formally recorded by the competent authority.",
    drafting_instructions: "Include the identity of the person giving the statement, the \
account of events, questions and answers if any, a declaration that the statement was given \
freely, and fields for the date and signature. Respect the legal requirements that depend on \
whether the person is a suspect, victim or witness.",
    disclaimer_text: "This statement draft was generated automatically and is only an example. \
Consult a legal advisor about its accuracy, validity and suitability for your situation, and \
have it formally recorded by the competent authority. You may edit the generated text to fit \
your needs.",
    disclaimer_markers: &["consult a legal advisor", "formally recorded by the competent authority"],
};

impl GenerationProfile {
    pub fn for_kind(kind: ArtifactKind) -> &'static GenerationProfile {
        match kind {
            ArtifactKind::Contract => &CONTRACT_PROFILE,
            ArtifactKind::Petition => &PETITION_PROFILE,
            ArtifactKind::Statement => &STATEMENT_PROFILE,
        }
    }

    pub fn disclaimer(&self) -> DisclaimerRule<'static> {
        DisclaimerRule {
            text: self.disclaimer_text,
            markers: self.disclaimer_markers,
        }
    }

    pub fn user_prompt(
        &self,
        template: &TemplateSpec,
        fields: &FieldValues,
        custom_prompt: Option<&str>,
    ) -> String {
        let mut prompt = format!(
            "Please draft a '{type_name}' {label} from the information below.\n\n\
             **{noun} type:** {type_name}\n\n\
             **Provided information:**\n{fields}\n\n",
            type_name = template.name,
            label = self.label,
            noun = title_case_label(self.label),
            fields = bullet_fields(template, fields),
        );

        if let Some(custom) = custom_prompt.map(str::trim).filter(|custom| !custom.is_empty()) {
            let _ = write!(prompt, "**Additional notes / special requests:**\n{custom}\n\n");
        }

        let _ = write!(
            prompt,
            "Write the {label} in HTML. {instructions} Finally, add this disclaimer at the end: '{disclaimer}'",
            label = self.label,
            instructions = self.drafting_instructions,
            disclaimer = self.disclaimer_text,
        );
        prompt
    }
}

/// `company_name` becomes `Company Name`.
pub fn title_case_label(key: &str) -> String {
    key.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One line per non-blank value, labeled from the template when it knows the field.
fn bullet_fields(template: &TemplateSpec, fields: &FieldValues) -> String {
    fields
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(name, value)| match template.field(name) {
            Some(spec) => format!("- {}: {}", spec.label, value),
            None => format!("- {}: {}", title_case_label(name), value),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: ArtifactKind,
    /// Catalogue key, see [`crate::templates::templates`].
    pub type_key: String,
    pub title: Option<String>,
    pub fields: FieldValues,
    pub custom_prompt: Option<String>,
}

impl GenerationRequest {
    pub fn new(kind: ArtifactKind, type_key: impl Into<String>, fields: FieldValues) -> Self {
        Self {
            kind,
            type_key: type_key.into(),
            title: None,
            fields,
            custom_prompt: None,
        }
    }

    /// Resolves the template and checks the inputs against it.
    fn validate(&self) -> Result<&'static TemplateSpec, AssistError> {
        let type_key = self.type_key.trim();
        if type_key.is_empty() {
            return Err(AssistError::InvalidArgument("template type is empty".to_string()));
        }
        let template = find_template(self.kind, type_key).ok_or_else(|| AssistError::UnknownTemplate {
            kind: self.kind.as_str().to_string(),
            key: type_key.to_string(),
        })?;
        if self.fields.is_empty() {
            return Err(AssistError::InvalidArgument("no input fields given".to_string()));
        }

        let missing = template.missing_required(&self.fields);
        if !missing.is_empty() {
            return Err(AssistError::MissingFields(
                missing.into_iter().map(str::to_string).collect(),
            ));
        }
        Ok(template)
    }
}

/// Drafts, stores and edits generated legal documents.
pub struct ArtifactService {
    model: Arc<dyn LanguageModel>,
    artifacts: Arc<dyn ArtifactStore>,
    model_timeout: Duration,
    temperature: f32,
}

impl ArtifactService {
    pub fn new(model: Arc<dyn LanguageModel>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            model,
            artifacts,
            model_timeout: Duration::from_secs(120),
            temperature: 0.7,
        }
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Always persists an artifact: a model failure yields a labeled error artifact
    /// instead of an error.
    pub async fn generate(
        &self,
        user_id: &str,
        request: GenerationRequest,
    ) -> Result<GeneratedArtifact, AssistError> {
        let template = request.validate()?;
        let profile = GenerationProfile::for_kind(request.kind);
        let type_name = template.name;
        let completion = CompletionRequest::new(
            profile.system_prompt,
            profile.user_prompt(template, &request.fields, request.custom_prompt.as_deref()),
        )
        .with_temperature(self.temperature);

        let body = match with_deadline(
            self.model_timeout,
            self.model.complete(&completion),
            SearchError::ModelUnavailable,
        )
        .await
        {
            Ok(raw) => {
                let body = normalize_generation(&raw, type_name, &profile.disclaimer());
                if let Some(malformed) = body.malformed() {
                    warn!(kind = request.kind.as_str(), error = %malformed, "generation repaired");
                }
                body
            }
            Err(error) => {
                warn!(kind = request.kind.as_str(), error = %error, "generation failed");
                error_body(profile, type_name, &error)
            }
        };

        let now = Utc::now();
        let artifact = GeneratedArtifact {
            artifact_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind: request.kind,
            type_key: template.key.to_string(),
            title: request
                .title
                .map(|title| title.trim().to_string())
                .filter(|title| !title.is_empty())
                .unwrap_or_else(|| type_name.to_string()),
            inputs: request.fields,
            custom_prompt: request.custom_prompt,
            html_body: body.html,
            text_body: body.text,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        };
        self.artifacts.create_artifact(&artifact).await?;

        info!(
            artifact_id = %artifact.artifact_id,
            kind = artifact.kind.as_str(),
            template = template.key,
            "artifact generated"
        );
        Ok(artifact)
    }

    /// Replaces the HTML body and optionally the title. The text body is re-derived and
    /// the disclaimer re-applied if the edit removed it.
    pub async fn edit_artifact(
        &self,
        user_id: &str,
        artifact_id: Uuid,
        title: Option<&str>,
        html_body: &str,
    ) -> Result<GeneratedArtifact, AssistError> {
        let mut artifact = self.get_artifact(user_id, artifact_id).await?;

        if let Some(title) = title {
            let title = title.trim();
            if title.is_empty() {
                return Err(AssistError::InvalidArgument("title is empty".to_string()));
            }
            artifact.title = title.to_string();
        }

        let profile = GenerationProfile::for_kind(artifact.kind);
        let body = normalize_generation(html_body, &artifact.title, &profile.disclaimer());
        if let Some(malformed) = body.malformed() {
            warn!(artifact_id = %artifact_id, error = %malformed, "edited body repaired");
        }

        artifact.html_body = body.html;
        artifact.text_body = body.text;
        artifact.updated_at = Utc::now();
        self.artifacts.update_artifact(&artifact).await?;
        Ok(artifact)
    }

    pub async fn get_artifact(
        &self,
        user_id: &str,
        artifact_id: Uuid,
    ) -> Result<GeneratedArtifact, AssistError> {
        self.artifacts
            .get_artifact(artifact_id)
            .await?
            .filter(|artifact| artifact.user_id == user_id && !artifact.is_deleted)
            .ok_or_else(|| AssistError::ArtifactNotFound(artifact_id.to_string()))
    }

    pub async fn list_artifacts(
        &self,
        user_id: &str,
        kind: Option<ArtifactKind>,
    ) -> Result<Vec<GeneratedArtifact>, AssistError> {
        Ok(self.artifacts.list_artifacts(user_id, kind).await?)
    }

    pub async fn delete_artifact(&self, user_id: &str, artifact_id: Uuid) -> Result<(), AssistError> {
        self.get_artifact(user_id, artifact_id).await?;
        self.artifacts.soft_delete_artifact(artifact_id).await?;
        info!(artifact_id = %artifact_id, "artifact deleted");
        Ok(())
    }
}

fn error_body(profile: &GenerationProfile, type_name: &str, error: &SearchError) -> NormalizedBody {
    let html = format!(
        "<h1>{name} - Error</h1>\
         <p>An error occurred while generating the {label}: {error}</p>\
         <p>Please try again later or contact the administrator.</p>",
        name = escape_html(type_name),
        label = profile.label,
        error = escape_html(&error.to_string()),
    );
    normalize_generation(&html, type_name, &profile.disclaimer())
}
