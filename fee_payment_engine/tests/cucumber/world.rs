use cucumber::World;
use fee_payment_engine::{
    db_types::{PaymentStatus, Student},
    payment_objects::PaymentOutcome,
    test_utils::prepare_env::{create_database, random_db_path, run_migrations},
    EngineConfig,
    PaymentFlowApi,
    SqliteDatabase,
    StudentManagement,
};
use log::*;

#[derive(Default, Debug, World)]
pub struct FeeWorld {
    pub system: Option<FeeSystem>,
    pub last_outcome: Option<PaymentOutcome>,
}

#[derive(Debug)]
pub struct FeeSystem {
    pub db_path: String,
    pub api: PaymentFlowApi<SqliteDatabase>,
}

impl FeeWorld {
    pub fn api(&self) -> &PaymentFlowApi<SqliteDatabase> {
        &self.system.as_ref().expect("PaymentFlowApi not initialised").api
    }

    pub async fn student(&self, admission_no: &str) -> Student {
        self.api()
            .db()
            .fetch_student_by_admission_no(admission_no)
            .await
            .expect("Error fetching student")
            .unwrap_or_else(|| panic!("Student {admission_no} does not exist"))
    }

    pub async fn payment_status(&self, txid: &str) -> PaymentStatus {
        let payment = self.api().db().fetch_payment(txid).await.expect("Error fetching payment");
        payment.unwrap_or_else(|| panic!("Payment {txid} does not exist")).status
    }
}

impl FeeSystem {
    pub async fn new(config: EngineConfig) -> Self {
        let url = prepare_test_env().await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating connection to database");
        debug!("Created database: {url}");
        let api = PaymentFlowApi::new(db, Default::default()).with_config(config);
        Self { db_path: url, api }
    }
}

pub async fn prepare_test_env() -> String {
    let path = random_db_path();
    create_database(&path).await;
    run_migrations(&path).await;
    path
}
