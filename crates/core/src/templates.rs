//! Catalogue of draftable document types and the input fields each one takes.

use crate::models::{ArtifactKind, FieldValues};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Textarea,
    Number,
    Date,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::Number => "number",
            FieldKind::Date => "date",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Example value shown to the user.
    pub placeholder: Option<&'static str>,
}

impl FieldSpec {
    const fn required(name: &'static str, label: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            label,
            kind,
            required: true,
            placeholder: None,
        }
    }

    const fn optional(name: &'static str, label: &'static str, kind: FieldKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, label, kind)
        }
    }

    const fn hint(self, placeholder: &'static str) -> Self {
        Self {
            placeholder: Some(placeholder),
            ..self
        }
    }
}

#[derive(Debug)]
pub struct TemplateSpec {
    pub key: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub fields: &'static [FieldSpec],
}

impl TemplateSpec {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Required fields that are absent or blank in `values`, in catalogue order.
    pub fn missing_required(&self, values: &FieldValues) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|field| field.required)
            .filter(|field| !values.get(field.name).is_some_and(|value| !value.trim().is_empty()))
            .map(|field| field.name)
            .collect()
    }
}

use FieldKind::{Date, Number, Text, Textarea};

static CONTRACT_TEMPLATES: &[TemplateSpec] = &[
    TemplateSpec {
        key: "employment_contract",
        name: "Employment Contract",
        category: "Employment",
        fields: &[
            FieldSpec::required("company_name", "Company Name", Text),
            FieldSpec::required("employee_name", "Employee Name", Text),
            FieldSpec::required("position", "Position", Text),
            FieldSpec::required("salary", "Salary", Number),
            FieldSpec::required("start_date", "Start Date", Date),
            FieldSpec::optional("term", "Term (Fixed/Indefinite)", Text).hint("Indefinite"),
        ],
    },
    TemplateSpec {
        key: "non_disclosure_agreement",
        name: "Non-Disclosure Agreement",
        category: "Employment",
        fields: &[
            FieldSpec::required("parties", "Parties", Textarea).hint("e.g. ABC Inc. and XYZ Ltd."),
            FieldSpec::required("purpose", "Purpose of the Agreement", Textarea),
            FieldSpec::required("confidential_information", "Definition of Confidential Information", Textarea),
            FieldSpec::required("term", "Term", Text).hint("e.g. 2 years"),
        ],
    },
    TemplateSpec {
        key: "freelance_contract",
        name: "Freelance Contract",
        category: "Employment",
        fields: &[
            FieldSpec::required("client", "Client", Text),
            FieldSpec::required("freelancer", "Freelancer", Text),
            FieldSpec::required("scope_of_work", "Scope of Work", Textarea),
            FieldSpec::required("fee", "Fee", Number),
            FieldSpec::required("delivery_time", "Delivery Time", Text).hint("e.g. 30 days"),
        ],
    },
    TemplateSpec {
        key: "internship_contract",
        name: "Internship Contract",
        category: "Employment",
        fields: &[
            FieldSpec::required("company_name", "Company Name", Text),
            FieldSpec::required("intern_name", "Intern Name", Text),
            FieldSpec::required("duration", "Internship Duration", Text).hint("e.g. 3 months"),
            FieldSpec::optional("working_hours", "Working Hours", Text).hint("e.g. 09:00 - 17:00"),
            FieldSpec::optional("payment", "Payment (If Any)", Text).hint("None"),
        ],
    },
    TemplateSpec {
        key: "remote_work_contract",
        name: "Remote Work Contract",
        category: "Employment",
        fields: &[
            FieldSpec::required("company_name", "Company Name", Text),
            FieldSpec::required("employee_name", "Employee Name", Text),
            FieldSpec::required("position", "Position", Text),
            FieldSpec::required("salary", "Salary", Number),
            FieldSpec::required("work_location", "Work Location", Text).hint("Home"),
        ],
    },
    TemplateSpec {
        key: "residential_lease",
        name: "Residential Lease Agreement",
        category: "Real Estate",
        fields: &[
            FieldSpec::required("tenant", "Tenant", Text),
            FieldSpec::required("landlord", "Landlord", Text),
            FieldSpec::required("property_address", "Property Address", Textarea),
            FieldSpec::required("rent_amount", "Rent Amount", Number),
            FieldSpec::optional("deposit_amount", "Deposit Amount", Number),
            FieldSpec::required("lease_term", "Lease Term", Text).hint("e.g. 1 year"),
            FieldSpec::optional("other_terms", "Other Terms", Textarea).hint("Service charges, maintenance, etc."),
        ],
    },
    TemplateSpec {
        key: "commercial_lease",
        name: "Commercial Lease Agreement",
        category: "Real Estate",
        fields: &[
            FieldSpec::required("tenant", "Tenant (Company/Full Name)", Text),
            FieldSpec::required("landlord", "Landlord (Company/Full Name)", Text),
            FieldSpec::required("premises_address", "Premises Address", Textarea),
            FieldSpec::required("monthly_rent", "Monthly Rent", Number),
            FieldSpec::optional("withholding_tax", "Withholding Tax", Text).hint("Paid by the tenant"),
            FieldSpec::required("lease_term", "Lease Term", Text).hint("e.g. 3 years"),
            FieldSpec::optional("deposit", "Deposit", Number),
        ],
    },
    TemplateSpec {
        key: "property_sale_promise",
        name: "Promise to Sell Real Property",
        category: "Real Estate",
        fields: &[
            FieldSpec::required("promisor", "Promisor (Seller)", Text),
            FieldSpec::required("promisee", "Promisee (Buyer)", Text),
            FieldSpec::required("property_details", "Property Details (Plot, Parcel, Address)", Textarea),
            FieldSpec::required("sale_price", "Sale Price", Number),
            FieldSpec::required("payment_terms", "Payment Terms", Textarea),
            FieldSpec::optional("handover_date", "Handover Date", Date),
        ],
    },
    TemplateSpec {
        key: "cleaning_services",
        name: "Cleaning Services Agreement",
        category: "Services",
        fields: &[
            FieldSpec::required("customer", "Customer", Text),
            FieldSpec::required("provider", "Service Provider (Company)", Text),
            FieldSpec::required("scope", "Scope of Service", Textarea).hint("General office cleaning, windows, etc."),
            FieldSpec::required("frequency", "Service Frequency", Text).hint("Twice a week, monthly, etc."),
            FieldSpec::required("fee", "Fee", Number),
            FieldSpec::optional("supplies", "Supplies", Text).hint("Provided by the service provider"),
        ],
    },
    TemplateSpec {
        key: "legal_services",
        name: "Legal Services Agreement",
        category: "Services",
        fields: &[
            FieldSpec::required("client", "Client", Text),
            FieldSpec::required("attorney", "Attorney/Law Firm", Text),
            FieldSpec::required("matter", "Matter (Litigation/Advice)", Textarea),
            FieldSpec::required("attorney_fee", "Attorney Fee", Text).hint("e.g. 10,000 EUR + VAT"),
            FieldSpec::optional("expenses", "Expenses", Text).hint("Borne by the client"),
        ],
    },
    TemplateSpec {
        key: "sale_of_goods",
        name: "Sale of Goods Agreement",
        category: "Commercial",
        fields: &[
            FieldSpec::required("seller", "Seller", Text),
            FieldSpec::required("buyer", "Buyer", Text),
            FieldSpec::required("goods", "Type and Quantity of Goods", Textarea),
            FieldSpec::required("price", "Unit Price and Total Price", Text),
            FieldSpec::required("delivery", "Place and Method of Delivery", Text),
            FieldSpec::required("payment_due", "Payment Due", Text),
        ],
    },
    TemplateSpec {
        key: "consulting_services",
        name: "Consulting Services Agreement",
        category: "Commercial",
        fields: &[
            FieldSpec::required("client", "Client (Receiving the Service)", Text),
            FieldSpec::required("consultant", "Consultant (Providing the Service)", Text),
            FieldSpec::required("subject", "Consulting Subject", Textarea),
            FieldSpec::required("term", "Term", Text).hint("e.g. 6 months"),
            FieldSpec::required("fee_and_payment", "Fee and Payment Terms", Textarea),
        ],
    },
    TemplateSpec {
        key: "general_contract",
        name: "General Purpose Contract",
        category: "General",
        fields: &[
            FieldSpec::required("first_party", "First Party (Name/Company)", Text),
            FieldSpec::required("second_party", "Second Party (Name/Company)", Text),
            FieldSpec::required("subject", "Subject of the Contract", Textarea),
            FieldSpec::required("key_terms", "Key Terms and Obligations", Textarea),
            FieldSpec::optional("term_and_price", "Term / Price (If Any)", Text),
            FieldSpec::optional("additional_clauses", "Additional Clauses (If Any)", Textarea),
        ],
    },
];

static PETITION_TEMPLATES: &[TemplateSpec] = &[
    TemplateSpec {
        key: "expert_report_objection",
        name: "Objection to Expert Report",
        category: "Court",
        fields: &[
            FieldSpec::required("objection_points", "Points of Objection in the Expert Report", Textarea),
            FieldSpec::optional("attachments", "Attachments (Supporting Documents)", Textarea),
        ],
    },
    TemplateSpec {
        key: "statement_of_claim",
        name: "Statement of Claim",
        category: "Court",
        fields: &[
            FieldSpec::required("case_summary", "Subject of the Case / Summary of Events", Textarea),
            FieldSpec::required("plaintiff", "Plaintiff (Name, ID Number, Address)", Textarea),
            FieldSpec::required("defendant", "Defendant (Name/Company, Address)", Textarea),
            FieldSpec::required("relief_sought", "Relief Sought", Textarea),
            FieldSpec::optional("place_and_date", "Place and Date of Events (If Known)", Text),
            FieldSpec::optional("site_inspection", "Request Site Inspection", Text).hint("true"),
            FieldSpec::optional("unquantified_claim", "Claim Value Undetermined", Text).hint("true"),
            FieldSpec::optional("attachments", "Attachments (Evidence, Contracts, Invoices)", Textarea),
        ],
    },
    TemplateSpec {
        key: "minutes",
        name: "Minutes",
        category: "General",
        fields: &[
            FieldSpec::required("subject", "Subject (e.g. Meeting, Inspection)", Text),
            FieldSpec::required("participants", "Participants", Textarea),
            FieldSpec::required("details", "Details (Events, Discussions, Decisions)", Textarea),
            FieldSpec::required("date", "Date", Date),
            FieldSpec::optional("attachments", "Attachments", Textarea),
        ],
    },
    TemplateSpec {
        key: "termination_notice",
        name: "Termination Notice",
        category: "General",
        fields: &[
            FieldSpec::required("reason", "Reason for Termination", Textarea),
            FieldSpec::required("parties", "Parties (e.g. Employer and Employee)", Textarea),
            FieldSpec::required("termination_date", "Termination Date", Date),
            FieldSpec::optional("attachments", "Attachments", Textarea),
        ],
    },
    TemplateSpec {
        key: "complaint",
        name: "Criminal Complaint",
        category: "Prosecution",
        fields: &[
            FieldSpec::required("complainant", "Complainant (Name, ID Number, Address, Phone)", Textarea),
            FieldSpec::required("accused", "Accused (Name/Company, Address)", Textarea),
            FieldSpec::required("details", "Details (Events, Dates, Places)", Textarea),
            FieldSpec::optional("attachments", "Attachments (Evidence, Documents)", Textarea),
        ],
    },
    TemplateSpec {
        key: "debt_objection",
        name: "Objection to Payment Order",
        category: "Enforcement",
        fields: &[
            FieldSpec::required("debtor", "Debtor (Name/Company, Tax Number, Address)", Textarea),
            FieldSpec::required("grounds", "Grounds for Objection", Textarea),
            FieldSpec::optional("attachments", "Attachments (Supporting Documents)", Textarea),
        ],
    },
];

macro_rules! statement_template {
    ($key:literal, $name:literal $(, $extra:expr)* $(,)?) => {
        TemplateSpec {
            key: $key,
            name: $name,
            category: "Statements",
            fields: &[
                FieldSpec::required("incident_summary", "Summary of the Incident", Textarea),
                FieldSpec::optional("witness_details", "Witness Details", Textarea),
                FieldSpec::required("incident_location", "Incident Location", Text),
                FieldSpec::required("incident_date", "Incident Date", Date),
                $($extra,)*
            ],
        }
    };
}

static STATEMENT_TEMPLATES: &[TemplateSpec] = &[
    statement_template!("general_statement", "General Statement"),
    statement_template!(
        "complainant_statement",
        "Complainant Statement",
        FieldSpec::optional("accused_person", "Person Complained About", Text),
    ),
    statement_template!("victim_statement", "Victim Statement"),
    statement_template!("witness_statement", "Witness Statement"),
    statement_template!(
        "suspect_statement",
        "Suspect Statement",
        FieldSpec::optional("alleged_offence", "Alleged Offence", Text),
    ),
];

pub fn templates(kind: ArtifactKind) -> &'static [TemplateSpec] {
    match kind {
        ArtifactKind::Contract => CONTRACT_TEMPLATES,
        ArtifactKind::Petition => PETITION_TEMPLATES,
        ArtifactKind::Statement => STATEMENT_TEMPLATES,
    }
}

pub fn find_template(kind: ArtifactKind, key: &str) -> Option<&'static TemplateSpec> {
    templates(kind).iter().find(|template| template.key == key)
}
